//! Registry of precompiled step-chain modules.
//!
//! Scripts are authored as Rust functions compiled into the host (or a
//! station-specific plugin crate) and registered here by module name. A
//! script manifest on disk selects a module; every load instantiates a fresh
//! [`ScriptModule`] from its factory, so a reload never shares state with the
//! previous version.

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::context::ChainContext;

/// One tick of a chain. Returning an error (or panicking) crashes the chain;
/// the scheduler pauses it and leaves every other chain running.
pub type EntryFn = Arc<dyn Fn(&ChainContext) -> anyhow::Result<()> + Send + Sync>;

/// Produces a fresh module instance per load.
pub type ModuleFactory = Arc<dyn Fn() -> ScriptModule + Send + Sync>;

/// A named table of entry functions, the unit a script manifest points at.
#[derive(Default)]
pub struct ScriptModule {
    functions: IndexMap<String, EntryFn>,
}

impl ScriptModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named function (builder style).
    pub fn function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&ChainContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<EntryFn> {
        self.functions.get(name).cloned()
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }
}

/// Module name → factory table. Populated by the host application at startup.
#[derive(Default)]
pub struct ScriptRegistry {
    modules: DashMap<String, ModuleFactory>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, module: &str, factory: F)
    where
        F: Fn() -> ScriptModule + Send + Sync + 'static,
    {
        self.modules.insert(module.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Instantiate a fresh module. Returns `None` for unregistered names.
    pub fn instantiate(&self, module: &str) -> Option<ScriptModule> {
        let factory = self.modules.get(module)?.value().clone();
        Some(factory())
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
