//! StepChain Script Runtime
//!
//! The core of the workstation automation framework:
//! - ScriptRegistry: precompiled step-chain modules registered by name
//! - ScriptLoader: script manifests on disk, entry resolution, hot reload
//! - ChainContext: the execution environment surfaced to running chains
//!   (flow/timing/vars/values/ui/workers/views sub-APIs)
//! - ScriptRuntime: the supervisor that pumps the worker bus into chain
//!   contexts, dispatches control commands and runs per-chain tick threads
//!
//! Script code only ever talks to [`ChainContext`]; it never touches the bus,
//! the bridge or other chains directly.

pub mod apis;
pub mod context;
pub mod loader;
pub mod registry;
pub mod runtime;

mod error;

pub use context::ChainContext;
pub use error::ScriptError;
pub use loader::{ScriptInfo, ScriptLoader};
pub use registry::{EntryFn, ModuleFactory, ScriptModule, ScriptRegistry};
pub use runtime::{RuntimeConfig, ScriptRuntime};

pub type Result<T> = std::result::Result<T, ScriptError>;
