//! Rhai compile/execute pipeline.
//!
//! Every run gets a fresh interpreter: the engine, the compiled entry
//! script, and everything the script loaded live inside one
//! [`ScriptContext`] that is dropped wholesale when the execution unit is
//! unloaded. Classpath entries become static modules importable by file
//! stem; entries linked later replace earlier ones with the same name, so
//! declared dependencies shadow bundled libraries.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rhai::module_resolvers::StaticModuleResolver;
use rhai::{Dynamic, Engine, FnPtr, Module, Scope, AST};

use crate::plugin::{PluginDescriptor, PluginLanguage};

use super::classpath::{module_files, module_name};
use super::lifecycle::{CleanupAction, ExecutionUnit, LoadedContext};
use super::{ClasspathEntry, ErrorRecord, HostBindings, PluginRunner, PreparedPlugin, RunnerError};

/// Library file extensions a Rhai classpath entry contributes.
const LIBRARY_EXTENSIONS: [&str; 1] = ["rhai"];

/// Isolated loading context of one Rhai run.
///
/// Holds the engine and entry AST alive for the unit's registered cleanup
/// callbacks; dropping it releases every module the run loaded.
pub struct ScriptContext {
    _engine: Arc<Engine>,
    _ast: Arc<AST>,
}

impl ScriptContext {
    pub(crate) fn new(engine: Arc<Engine>, ast: Arc<AST>) -> Self {
        Self { _engine: engine, _ast: ast }
    }

    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        let engine = Engine::new();
        let ast = engine.compile("").expect("empty script compiles");
        Self::new(Arc::new(engine), Arc::new(ast))
    }
}

/// Pipeline for plugins written in Rhai.
#[derive(Debug, Default)]
pub struct RhaiPluginRunner;

impl RhaiPluginRunner {
    pub fn new() -> Self {
        Self
    }
}

impl PluginRunner for RhaiPluginRunner {
    fn language(&self) -> PluginLanguage {
        PluginLanguage::Rhai
    }

    fn prepare(
        &self,
        descriptor: &PluginDescriptor,
        classpath: &[ClasspathEntry],
        bindings: &HostBindings,
    ) -> Result<PreparedPlugin, ErrorRecord> {
        let source = std::fs::read_to_string(&descriptor.entry_point).map_err(|err| {
            ErrorRecord::compile(&descriptor.id, "failed to read entry point")
                .with_cause(err.to_string())
                .with_location(&descriptor.entry_point, None)
        })?;

        let mut engine = Engine::new();
        let pending = register_host_bindings(&mut engine, bindings);

        // Library modules, linked in classpath order so later names win.
        let mut resolver = StaticModuleResolver::new();
        for entry in classpath {
            for file in module_files(entry, &LIBRARY_EXTENSIONS) {
                let module = compile_library(&engine, &file, descriptor)?;
                resolver.insert(module_name(&file), module);
            }
        }
        engine.set_module_resolver(resolver);

        let ast = engine.compile(&source).map_err(|err| {
            let line = err.1.line().map(|l| l as u32);
            ErrorRecord::compile(&descriptor.id, err.to_string())
                .with_location(&descriptor.entry_point, line)
        })?;

        let mut scope = Scope::new();
        scope.push_constant("PLUGIN_ROOT", descriptor.root.display().to_string());
        scope.push_constant("TRIGGER", bindings.trigger.kind.as_str().to_string());

        let engine = Arc::new(engine);
        let ast = Arc::new(ast);
        let descriptor = descriptor.clone();

        Ok(PreparedPlugin::new(move || {
            if let Err(err) = engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast) {
                let line = err.position().line().map(|l| l as u32);
                return Err(ErrorRecord::run(&descriptor.id, err.to_string())
                    .with_location(&descriptor.entry_point, line));
            }

            let callbacks =
                pending.lock().map(|mut c| std::mem::take(&mut *c)).unwrap_or_default();

            let context =
                ScriptContext::new(Arc::clone(&engine), Arc::clone(&ast));
            let mut unit = ExecutionUnit::new(descriptor, LoadedContext::Script(context));

            for (index, callback) in callbacks.into_iter().enumerate() {
                let engine = Arc::clone(&engine);
                let ast = Arc::clone(&ast);
                let label = format!("{}#{index}", callback.fn_name());
                unit.push_cleanup(CleanupAction::new(label, move || {
                    callback
                        .call::<Dynamic>(&engine, &ast, ())
                        .map(|_| ())
                        .map_err(|err| RunnerError::Script(err.to_string()))
                }));
            }

            Ok(unit)
        }))
    }
}

/// Register the host-binding surface on a fresh engine and return the
/// shared list `on_unload` callbacks accumulate into during the run.
fn register_host_bindings(
    engine: &mut Engine,
    bindings: &HostBindings,
) -> Arc<Mutex<Vec<FnPtr>>> {
    let logger = bindings.logger.clone();
    engine.on_print(move |message| logger.info(message));

    let logger = bindings.logger.clone();
    engine.register_fn("log_info", move |message: &str| logger.info(message));
    let logger = bindings.logger.clone();
    engine.register_fn("log_warn", move |message: &str| logger.warn(message));
    let logger = bindings.logger.clone();
    engine.register_fn("log_error", move |message: &str| logger.error(message));

    let pending: Arc<Mutex<Vec<FnPtr>>> = Arc::new(Mutex::new(Vec::new()));
    let registrar = Arc::clone(&pending);
    engine.register_fn("on_unload", move |callback: FnPtr| {
        if let Ok(mut callbacks) = registrar.lock() {
            callbacks.push(callback);
        }
    });

    pending
}

/// Compile one library file into a module.
fn compile_library(
    engine: &Engine,
    file: &Path,
    descriptor: &PluginDescriptor,
) -> Result<Module, ErrorRecord> {
    let source = std::fs::read_to_string(file).map_err(|err| {
        ErrorRecord::compile(&descriptor.id, "failed to read library")
            .with_cause(err.to_string())
            .with_location(file, None)
    })?;

    let ast = engine.compile(&source).map_err(|err| {
        let line = err.1.line().map(|l| l as u32);
        ErrorRecord::compile(&descriptor.id, err.to_string()).with_location(file, line)
    })?;

    Module::eval_ast_as_new(Scope::new(), &ast, engine).map_err(|err| {
        let line = err.position().line().map(|l| l as u32);
        ErrorRecord::compile(&descriptor.id, err.to_string()).with_location(file, line)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{LogSink, PluginLogger, TriggerContext};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_plugin(dir: &Path, source: &str) -> PluginDescriptor {
        std::fs::write(dir.join("plugin.rhai"), source).unwrap();
        PluginDescriptor::resolve("demo", dir).unwrap()
    }

    fn bindings_with_sink(root: PathBuf) -> (HostBindings, LogSink) {
        let sink: LogSink = Arc::new(Mutex::new(Vec::new()));
        let logger = PluginLogger::new("demo").with_sink(Arc::clone(&sink));
        (HostBindings::new(TriggerContext::manual(), logger, root), sink)
    }

    #[test]
    fn test_run_logs_through_bindings() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor = write_plugin(temp_dir.path(), r#"log_info("hello");"#);
        let (bindings, sink) = bindings_with_sink(temp_dir.path().to_path_buf());

        let runner = RhaiPluginRunner::new();
        let unit = runner.prepare(&descriptor, &[], &bindings).unwrap().execute().unwrap();

        assert_eq!(unit.cleanup_count(), 0);
        assert_eq!(*sink.lock().unwrap(), vec!["hello"]);
    }

    #[test]
    fn test_scope_constants_are_injected() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor =
            write_plugin(temp_dir.path(), r#"log_info(TRIGGER); log_info(PLUGIN_ROOT);"#);
        let (bindings, sink) = bindings_with_sink(temp_dir.path().to_path_buf());

        let runner = RhaiPluginRunner::new();
        runner.prepare(&descriptor, &[], &bindings).unwrap().execute().unwrap();

        let lines = sink.lock().unwrap();
        assert_eq!(lines[0], "manual");
        assert_eq!(lines[1], temp_dir.path().display().to_string());
    }

    #[test]
    fn test_compile_error_has_location() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor = write_plugin(temp_dir.path(), "let x = ;\n");
        let (bindings, _sink) = bindings_with_sink(temp_dir.path().to_path_buf());

        let runner = RhaiPluginRunner::new();
        let err = runner.prepare(&descriptor, &[], &bindings).unwrap_err();

        assert_eq!(err.phase, crate::runner::Phase::Compile);
        let location = err.location.expect("parse errors carry a location");
        assert_eq!(location.file, descriptor.entry_point);
        assert!(location.line.is_some());
    }

    #[test]
    fn test_runtime_error_is_run_phase() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor = write_plugin(temp_dir.path(), r#"throw "boom";"#);
        let (bindings, _sink) = bindings_with_sink(temp_dir.path().to_path_buf());

        let runner = RhaiPluginRunner::new();
        let err = runner.prepare(&descriptor, &[], &bindings).unwrap().execute().unwrap_err();

        assert_eq!(err.phase, crate::runner::Phase::Run);
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn test_on_unload_callbacks_become_cleanups() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor = write_plugin(
            temp_dir.path(),
            r#"
log_info("run");
on_unload(|| log_info("bye"));
"#,
        );
        let (bindings, sink) = bindings_with_sink(temp_dir.path().to_path_buf());

        let runner = RhaiPluginRunner::new();
        let unit = runner.prepare(&descriptor, &[], &bindings).unwrap().execute().unwrap();
        assert_eq!(unit.cleanup_count(), 1);

        assert!(unit.unload().is_empty());
        assert_eq!(*sink.lock().unwrap(), vec!["run", "bye"]);
    }

    #[test]
    fn test_classpath_module_import() {
        let temp_dir = TempDir::new().unwrap();
        let lib_dir = temp_dir.path().join("support");
        std::fs::create_dir_all(&lib_dir).unwrap();
        std::fs::write(lib_dir.join("util.rhai"), r#"fn tag() { "support" }"#).unwrap();

        let plugin_dir = temp_dir.path().join("demo");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let descriptor = write_plugin(
            &plugin_dir,
            r#"
import "util" as util;
log_info(util::tag());
"#,
        );
        let (bindings, sink) = bindings_with_sink(plugin_dir.clone());

        let classpath =
            vec![ClasspathEntry::new(lib_dir, crate::runner::ClasspathOrigin::SupportLib)];
        let runner = RhaiPluginRunner::new();
        runner.prepare(&descriptor, &classpath, &bindings).unwrap().execute().unwrap();

        assert_eq!(*sink.lock().unwrap(), vec!["support"]);
    }

    #[test]
    fn test_later_classpath_entry_shadows_earlier() {
        let temp_dir = TempDir::new().unwrap();
        let support = temp_dir.path().join("support");
        let declared = temp_dir.path().join("declared");
        std::fs::create_dir_all(&support).unwrap();
        std::fs::create_dir_all(&declared).unwrap();
        std::fs::write(support.join("util.rhai"), r#"fn tag() { "support" }"#).unwrap();
        std::fs::write(declared.join("util.rhai"), r#"fn tag() { "declared" }"#).unwrap();

        let plugin_dir = temp_dir.path().join("demo");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let descriptor = write_plugin(
            &plugin_dir,
            r#"
import "util" as util;
log_info(util::tag());
"#,
        );
        let (bindings, sink) = bindings_with_sink(plugin_dir.clone());

        let classpath = vec![
            ClasspathEntry::new(support, crate::runner::ClasspathOrigin::SupportLib),
            ClasspathEntry::new(declared, crate::runner::ClasspathOrigin::Declared),
        ];
        let runner = RhaiPluginRunner::new();
        runner.prepare(&descriptor, &classpath, &bindings).unwrap().execute().unwrap();

        assert_eq!(*sink.lock().unwrap(), vec!["declared"]);
    }
}
