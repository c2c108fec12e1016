//! Execution units and the lifecycle manager.
//!
//! An execution unit is the live instantiation of one plugin: the isolated
//! loading context its code lives in plus the cleanup actions it registered.
//! The lifecycle manager owns the process-wide id-to-unit map; it is empty
//! at host start, every mutation goes through it, and `unload_all` tears it
//! down at host shutdown.

use std::collections::HashMap;

use crate::plugin::PluginDescriptor;

use super::script::ScriptContext;
use super::wasm::WasmContext;
use super::{ErrorRecord, RunnerError};

/// Boxed cleanup callback, run once at unload.
pub type CleanupFn = Box<dyn FnMut() -> Result<(), RunnerError> + Send>;

/// One cleanup action a plugin registered through the host bindings.
pub struct CleanupAction {
    label: String,
    action: CleanupFn,
}

impl CleanupAction {
    pub fn new(
        label: impl Into<String>,
        action: impl FnMut() -> Result<(), RunnerError> + Send + 'static,
    ) -> Self {
        Self { label: label.into(), action: Box::new(action) }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn run(&mut self) -> Result<(), RunnerError> {
        (self.action)()
    }
}

impl std::fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupAction").field("label", &self.label).finish()
    }
}

/// The isolated code-loading context of one execution unit.
///
/// A closed set: one variant per supported language. Dropping the context
/// discards every class/module the run loaded, wholesale.
pub enum LoadedContext {
    /// A Rhai engine plus the compiled entry script.
    Script(ScriptContext),
    /// A wasmtime store plus the instantiated entry module.
    Wasm(WasmContext),
}

impl std::fmt::Debug for LoadedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Script(_) => write!(f, "LoadedContext::Script"),
            Self::Wasm(_) => write!(f, "LoadedContext::Wasm"),
        }
    }
}

/// The live, running instantiation of one plugin.
#[derive(Debug)]
pub struct ExecutionUnit {
    descriptor: PluginDescriptor,
    cleanups: Vec<CleanupAction>,
    context: LoadedContext,
}

impl ExecutionUnit {
    pub fn new(descriptor: PluginDescriptor, context: LoadedContext) -> Self {
        Self { descriptor, cleanups: Vec::new(), context }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn plugin_id(&self) -> &str {
        &self.descriptor.id
    }

    /// Number of registered cleanup actions.
    pub fn cleanup_count(&self) -> usize {
        self.cleanups.len()
    }

    /// Register a cleanup action to run at unload.
    pub fn push_cleanup(&mut self, action: CleanupAction) {
        self.cleanups.push(action);
    }

    /// Tear the unit down.
    ///
    /// Cleanup actions run in reverse registration order; a failing action
    /// is captured as a run-phase error and does not stop the remaining
    /// actions. The loading context is dropped afterwards, releasing every
    /// module the run loaded.
    pub fn unload(mut self) -> Vec<ErrorRecord> {
        let mut records = Vec::new();

        for mut cleanup in self.cleanups.drain(..).rev() {
            tracing::debug!(
                plugin = %self.descriptor.id,
                action = cleanup.label(),
                "running cleanup action"
            );
            if let Err(err) = cleanup.run() {
                records.push(
                    ErrorRecord::run(
                        &self.descriptor.id,
                        format!("cleanup action '{}' failed", cleanup.label()),
                    )
                    .with_cause(err.to_string()),
                );
            }
        }

        drop(self.context);
        records
    }
}

/// Process-wide registry of active execution units.
///
/// At most one unit is live per plugin id; installing over an existing id
/// unloads the previous unit first. All access is serialized through the
/// single instance the coordinator owns.
#[derive(Debug, Default)]
pub struct LifecycleManager {
    units: HashMap<String, ExecutionUnit>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly executed unit, unloading any previous unit for the
    /// same id first. Returns the error records the unload produced.
    pub fn install(&mut self, unit: ExecutionUnit) -> Vec<ErrorRecord> {
        let id = unit.plugin_id().to_string();
        let records = self.unload(&id);
        self.units.insert(id, unit);
        records
    }

    /// Unload the unit registered for an id. No-op on unknown ids.
    pub fn unload(&mut self, plugin_id: &str) -> Vec<ErrorRecord> {
        match self.units.remove(plugin_id) {
            Some(unit) => {
                tracing::info!(plugin = %plugin_id, "unloading execution unit");
                unit.unload()
            }
            None => Vec::new(),
        }
    }

    /// Unload every registered unit (host shutdown). Ids are processed in
    /// sorted order so teardown diagnostics are deterministic.
    pub fn unload_all(&mut self) -> Vec<ErrorRecord> {
        let mut ids: Vec<String> = self.units.keys().cloned().collect();
        ids.sort();

        let mut records = Vec::new();
        for id in ids {
            records.extend(self.unload(&id));
        }
        records
    }

    /// Whether a unit is currently registered for an id.
    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.units.contains_key(plugin_id)
    }

    /// Ids of all registered units, sorted.
    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.units.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
