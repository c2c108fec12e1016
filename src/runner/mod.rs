//! The runner core.
//!
//! Everything between "a set of plugin ids" and "live execution units":
//! classpath assembly, the per-language compile/execute pipelines, the
//! lifecycle manager that owns active units, and the coordinator that runs
//! batches while keeping one plugin's failure away from every other.
//!
//! # Run pipeline
//!
//! ```text
//! RunnerHost::request_run
//! ├── list_plugins            discovery (fresh every batch)
//! ├── PluginDescriptor::resolve   language selection
//! ├── assemble_classpath      host-lib → support-lib → lib/ → declared deps
//! ├── PluginRunner::prepare   compile + load isolated context
//! ├── LifecycleManager::unload    tear down the previous unit
//! ├── PreparedPlugin::execute     invoke the entry point
//! └── LifecycleManager::install   commit the new unit
//! ```
//!
//! Failures at any stage become [`ErrorRecord`]s aggregated per batch; the
//! loop always continues with the next plugin id.

mod bindings;
mod classpath;
mod coordinator;
mod error;
mod lifecycle;
mod report;
mod resolver;
mod script;
mod wasm;

pub use bindings::{HostBindings, LogSink, PluginLogger, TriggerContext, TriggerKind};
pub use classpath::{
    assemble_classpath, scan_directives, ClasspathEntry, ClasspathOrigin, DependencySpec,
    DEPENDENCY_DIRECTIVE, PLUGIN_LIB_FOLDER,
};
pub use coordinator::{RunRequest, RunnerHost};
pub use error::{ErrorRecord, Phase, RunnerError, SourceLocation};
pub use lifecycle::{CleanupAction, CleanupFn, ExecutionUnit, LifecycleManager, LoadedContext};
pub use report::{ErrorReport, ErrorReporter};
pub use resolver::{DependencyResolver, DEFAULT_REGISTRY_URL};
pub use script::RhaiPluginRunner;
pub use wasm::WasmPluginRunner;

use crate::core::HostPaths;
use crate::plugin::{PluginDescriptor, PluginLanguage};

/// One compile/execute pipeline, one implementation per supported language.
///
/// `prepare` compiles the plugin's sources against the assembled classpath
/// and loads them into a fresh isolated context, but does not yet invoke
/// the entry point. The split lets the coordinator tear down the previous
/// execution unit between loading and running, so a reload observes
/// cleanup-before-run ordering and a compile failure leaves the previous
/// unit untouched.
pub trait PluginRunner: Send + Sync {
    /// Language this pipeline runs.
    fn language(&self) -> PluginLanguage;

    /// Compile the plugin and load its isolated context.
    fn prepare(
        &self,
        descriptor: &PluginDescriptor,
        classpath: &[ClasspathEntry],
        bindings: &HostBindings,
    ) -> Result<PreparedPlugin, ErrorRecord>;
}

/// A compiled and loaded plugin, ready to execute its entry point.
pub struct PreparedPlugin {
    entry: Box<dyn FnOnce() -> Result<ExecutionUnit, ErrorRecord> + Send>,
}

impl PreparedPlugin {
    pub(crate) fn new(
        entry: impl FnOnce() -> Result<ExecutionUnit, ErrorRecord> + Send + 'static,
    ) -> Self {
        Self { entry: Box::new(entry) }
    }

    /// Invoke the entry point and produce the execution unit.
    pub fn execute(self) -> Result<ExecutionUnit, ErrorRecord> {
        (self.entry)()
    }
}

impl std::fmt::Debug for PreparedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedPlugin").finish_non_exhaustive()
    }
}

/// Build one pipeline per supported language, in selection priority order.
pub fn create_runners(paths: &HostPaths) -> Vec<Box<dyn PluginRunner>> {
    vec![
        Box::new(RhaiPluginRunner::new()),
        Box::new(WasmPluginRunner::new(paths.compiled_root().to_path_buf())),
    ]
}
