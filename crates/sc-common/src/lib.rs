//! Shared vocabulary for the StepChain workstation runtime
//!
//! This crate holds what every other crate needs to agree on:
//! - Bus topic names and helpers for derived topics
//! - Worker and runtime command names
//! - Tolerant value conversions for device/MES payloads
//! - Logging setup

pub mod commands;
pub mod convert;
pub mod logging;
pub mod topics;

/// JSON object payload carried by bus and UI messages.
pub type Payload = serde_json::Map<String, serde_json::Value>;
