//! The execution coordinator.
//!
//! `RunnerHost` is the narrow interface external collaborators (the CLI,
//! the watch loop, a future tool window) call into: request a run of some
//! or all plugins, request an unload, and get back the aggregated error
//! view. Batches are processed sequentially in input order; each plugin is
//! taken through discovery, classpath assembly, its language pipeline, and
//! the lifecycle swap, with every failure contained to its own id.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::HostPaths;
use crate::plugin::{list_plugins, PluginDescriptor, PluginLanguage};

use super::{
    assemble_classpath, create_runners, DependencyResolver, ErrorRecord, ErrorReport,
    ErrorReporter, HostBindings, LifecycleManager, LogSink, PluginLogger, PluginRunner,
    RunnerError, TriggerContext,
};

/// Which plugins a run request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    /// Every discovered plugin, in id order.
    All,
    /// The given ids, in the given order.
    Ids(Vec<String>),
}

impl RunRequest {
    /// Convenience constructor for a single id.
    pub fn one(id: impl Into<String>) -> Self {
        Self::Ids(vec![id.into()])
    }
}

impl From<Vec<String>> for RunRequest {
    fn from(ids: Vec<String>) -> Self {
        Self::Ids(ids)
    }
}

/// The runner core's single entry point.
///
/// Owns the lifecycle manager (empty at host start; callers are expected
/// to `unload_all` at host shutdown) and the per-language pipelines. All
/// batch processing serializes through the lifecycle lock, so concurrent
/// triggers for the same id can never race a reload.
pub struct RunnerHost {
    paths: HostPaths,
    runners: Vec<Box<dyn PluginRunner>>,
    resolver: DependencyResolver,
    lifecycle: Mutex<LifecycleManager>,
    log_sink: Option<LogSink>,
}

impl RunnerHost {
    /// Create a host over the given path layout, creating any missing
    /// directories.
    pub fn new(paths: HostPaths) -> Result<Self, RunnerError> {
        paths.ensure_layout()?;
        let resolver = DependencyResolver::new(paths.dependency_cache().to_path_buf())?;
        let runners = create_runners(&paths);

        Ok(Self {
            paths,
            runners,
            resolver,
            lifecycle: Mutex::new(LifecycleManager::new()),
            log_sink: None,
        })
    }

    /// Create a host that resolves dependency coordinates against a custom
    /// registry URL.
    pub fn with_registry_url(paths: HostPaths, url: &str) -> Result<Self, RunnerError> {
        let mut host = Self::new(paths)?;
        host.resolver =
            DependencyResolver::with_url(host.paths.dependency_cache().to_path_buf(), url)?;
        Ok(host)
    }

    /// Attach a capture sink observing every plugin's log output in order.
    pub fn set_log_sink(&mut self, sink: LogSink) {
        self.log_sink = Some(sink);
    }

    /// Path layout this host runs over.
    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    /// Discover the plugins currently on disk.
    pub fn plugins(&self) -> BTreeMap<String, PathBuf> {
        list_plugins(self.paths.plugins_root())
    }

    /// Ids of the currently loaded execution units.
    pub fn loaded_ids(&self) -> Vec<String> {
        self.lock_lifecycle().loaded_ids()
    }

    /// Run a batch of plugins.
    ///
    /// Plugins are processed strictly in request order (sorted id order for
    /// [`RunRequest::All`]); one id's failure is recorded and the batch
    /// moves on.
    pub fn request_run(&self, request: &RunRequest, trigger: &TriggerContext) -> ErrorReport {
        let available = self.plugins();
        let ids: Vec<String> = match request {
            RunRequest::All => available.keys().cloned().collect(),
            RunRequest::Ids(ids) => ids.clone(),
        };

        let mut reporter = ErrorReporter::new();
        let mut lifecycle = self.lock_lifecycle();

        for id in &ids {
            self.run_one(&mut lifecycle, id, &available, trigger, &mut reporter);
        }

        reporter.flush()
    }

    /// Unload one plugin's execution unit. A no-op for ids with no unit.
    pub fn request_unload(&self, id: &str) -> ErrorReport {
        let mut reporter = ErrorReporter::new();
        reporter.report_all(self.lock_lifecycle().unload(id));
        reporter.flush()
    }

    /// Unload every execution unit (host shutdown).
    pub fn unload_all(&self) -> ErrorReport {
        let mut reporter = ErrorReporter::new();
        reporter.report_all(self.lock_lifecycle().unload_all());
        reporter.flush()
    }

    /// Take one plugin id through the whole pipeline, recording any failure
    /// and returning so the caller can continue with the next id.
    fn run_one(
        &self,
        lifecycle: &mut LifecycleManager,
        id: &str,
        available: &BTreeMap<String, PathBuf>,
        trigger: &TriggerContext,
        reporter: &mut ErrorReporter,
    ) {
        let Some(root) = available.get(id) else {
            reporter.report(ErrorRecord::discovery(
                id,
                "no plugin folder with this id under the plugins root",
            ));
            return;
        };

        let Some(descriptor) = PluginDescriptor::resolve(id, root) else {
            let expected: Vec<&str> = PluginLanguage::in_priority_order()
                .iter()
                .map(PluginLanguage::entry_point_file)
                .collect();
            reporter.report(ErrorRecord::discovery(
                id,
                format!("no entry point found; expected one of: {}", expected.join(", ")),
            ));
            return;
        };

        let Some(runner) =
            self.runners.iter().find(|runner| runner.language() == descriptor.language)
        else {
            reporter.report(ErrorRecord::discovery(
                id,
                format!("no pipeline registered for language {}", descriptor.language),
            ));
            return;
        };

        let classpath = match assemble_classpath(&descriptor, &self.paths, &self.resolver) {
            Ok(classpath) => classpath,
            Err(record) => {
                reporter.report(record);
                return;
            }
        };

        let bindings = self.bindings_for(&descriptor, trigger);
        let prepared = match runner.prepare(&descriptor, &classpath, &bindings) {
            Ok(prepared) => prepared,
            Err(record) => {
                reporter.report(record);
                return;
            }
        };

        // The previous unit's teardown completes before the new unit's
        // entry point runs; a compile failure above leaves it untouched.
        reporter.report_all(lifecycle.unload(id));

        match prepared.execute() {
            Ok(unit) => {
                reporter.report_all(lifecycle.install(unit));
                tracing::info!(plugin = %id, language = %descriptor.language, "plugin loaded");
            }
            Err(record) => reporter.report(record),
        }
    }

    fn bindings_for(&self, descriptor: &PluginDescriptor, trigger: &TriggerContext) -> HostBindings {
        let mut logger = PluginLogger::new(&descriptor.id);
        if let Some(sink) = &self.log_sink {
            logger = logger.with_sink(Arc::clone(sink));
        }
        HostBindings::new(trigger.clone(), logger, descriptor.root.clone())
    }

    /// Lock the lifecycle manager, recovering from a poisoned lock rather
    /// than propagating the panic that poisoned it.
    fn lock_lifecycle(&self) -> MutexGuard<'_, LifecycleManager> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for RunnerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerHost")
            .field("plugins_root", &self.paths.plugins_root())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Phase;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_host(temp_dir: &TempDir) -> (RunnerHost, LogSink) {
        let paths = HostPaths::with_base(temp_dir.path());
        let mut host = RunnerHost::new(paths).unwrap();
        let sink: LogSink = Arc::new(Mutex::new(Vec::new()));
        host.set_log_sink(Arc::clone(&sink));
        (host, sink)
    }

    fn write_rhai_plugin(host: &RunnerHost, id: &str, source: &str) {
        let dir = host.paths().plugins_root().join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("plugin.rhai"), source).unwrap();
    }

    #[test]
    fn test_unknown_id_is_discovery_error_and_batch_continues() {
        let temp_dir = TempDir::new().unwrap();
        let (host, sink) = test_host(&temp_dir);
        write_rhai_plugin(&host, "real", r#"log_info("real");"#);

        let request = RunRequest::Ids(vec!["ghost".to_string(), "real".to_string()]);
        let report = host.request_run(&request, &TriggerContext::manual());

        assert_eq!(report.len(), 1);
        assert_eq!(report.records()[0].phase, Phase::Discovery);
        assert_eq!(report.records()[0].plugin_id, "ghost");
        assert_eq!(*sink.lock().unwrap(), vec!["real"]);
        assert_eq!(host.loaded_ids(), vec!["real"]);
    }

    #[test]
    fn test_batch_keeps_request_order() {
        let temp_dir = TempDir::new().unwrap();
        let (host, sink) = test_host(&temp_dir);
        write_rhai_plugin(&host, "alpha", r#"log_info("alpha");"#);
        write_rhai_plugin(&host, "beta", r#"log_info("beta");"#);

        let request = RunRequest::Ids(vec!["beta".to_string(), "alpha".to_string()]);
        let report = host.request_run(&request, &TriggerContext::manual());

        assert!(report.is_empty(), "unexpected errors: {report}");
        assert_eq!(*sink.lock().unwrap(), vec!["beta", "alpha"]);
    }

    #[test]
    fn test_run_all_uses_sorted_ids() {
        let temp_dir = TempDir::new().unwrap();
        let (host, sink) = test_host(&temp_dir);
        write_rhai_plugin(&host, "zeta", r#"log_info("zeta");"#);
        write_rhai_plugin(&host, "alpha", r#"log_info("alpha");"#);

        host.request_run(&RunRequest::All, &TriggerContext::startup());
        assert_eq!(*sink.lock().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_request_unload_unknown_id_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let (host, _sink) = test_host(&temp_dir);
        assert!(host.request_unload("ghost").is_empty());
    }
}
