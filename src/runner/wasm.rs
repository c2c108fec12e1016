//! WebAssembly compile/execute pipeline using wasmtime.
//!
//! Entry points are WebAssembly text (`plugin.wat`), compiled to a module
//! per run; the compiled artifact is serialized into the plugin's private
//! output directory. Classpath entries contribute `.wat`/`.wasm` library
//! modules, instantiated into the linker under their file-stem name with
//! shadowing allowed, so entries linked later override earlier ones when
//! names collide. Each run executes in a fresh store that is dropped
//! wholesale at unload.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use wasmtime::{Caller, Engine, Extern, Instance, Linker, Module, Store};

use crate::plugin::{PluginDescriptor, PluginLanguage};

use super::classpath::{module_files, module_name};
use super::lifecycle::{CleanupAction, ExecutionUnit, LoadedContext};
use super::{
    ClasspathEntry, ErrorRecord, HostBindings, PluginLogger, PluginRunner, PreparedPlugin,
    RunnerError,
};

/// Library file extensions a WebAssembly classpath entry contributes.
const LIBRARY_EXTENSIONS: [&str; 2] = ["wat", "wasm"];

/// Import module name for the host-binding surface.
const HOST_MODULE: &str = "host";

/// Required entry export invoked on every run.
const ENTRY_EXPORT: &str = "run";

/// File name of the serialized compile artifact.
const COMPILED_ARTIFACT: &str = "plugin.cwasm";

/// Per-store host state backing the `host` imports.
struct PluginState {
    logger: PluginLogger,
    trigger_code: i32,
    plugin_root: String,
    pending_unloads: Vec<String>,
}

/// Isolated loading context of one WebAssembly run.
///
/// The store keeps every instantiated module alive for the unit's cleanup
/// exports; dropping it discards the whole instance graph.
pub struct WasmContext {
    _store: Arc<Mutex<Store<PluginState>>>,
    _instance: Instance,
}

impl WasmContext {
    fn new(store: Arc<Mutex<Store<PluginState>>>, instance: Instance) -> Self {
        Self { _store: store, _instance: instance }
    }
}

/// Pipeline for plugins written as WebAssembly modules.
pub struct WasmPluginRunner {
    /// Root of per-plugin compiled output directories.
    compiled_root: PathBuf,
}

impl WasmPluginRunner {
    pub fn new(compiled_root: PathBuf) -> Self {
        Self { compiled_root }
    }
}

impl PluginRunner for WasmPluginRunner {
    fn language(&self) -> PluginLanguage {
        PluginLanguage::Wasm
    }

    fn prepare(
        &self,
        descriptor: &PluginDescriptor,
        classpath: &[ClasspathEntry],
        bindings: &HostBindings,
    ) -> Result<PreparedPlugin, ErrorRecord> {
        let source = std::fs::read(&descriptor.entry_point).map_err(|err| {
            ErrorRecord::compile(&descriptor.id, "failed to read entry point")
                .with_cause(err.to_string())
                .with_location(&descriptor.entry_point, None)
        })?;

        let engine = Engine::default();
        let module = Module::new(&engine, &source).map_err(|err| {
            ErrorRecord::compile(&descriptor.id, err.to_string())
                .with_location(&descriptor.entry_point, None)
        })?;

        self.write_artifact(descriptor, &module)?;

        let state = PluginState {
            logger: bindings.logger.clone(),
            trigger_code: bindings.trigger.kind.code(),
            plugin_root: descriptor.root.display().to_string(),
            pending_unloads: Vec::new(),
        };
        let mut store = Store::new(&engine, state);

        let mut linker: Linker<PluginState> = Linker::new(&engine);
        linker.allow_shadowing(true);
        register_host_functions(&mut linker).map_err(|err| {
            ErrorRecord::load(&descriptor.id, "failed to register host bindings")
                .with_cause(err.to_string())
        })?;

        // Library modules, linked in classpath order so later names win.
        for entry in classpath {
            for file in module_files(entry, &LIBRARY_EXTENSIONS) {
                let bytes = std::fs::read(&file).map_err(|err| {
                    ErrorRecord::compile(&descriptor.id, "failed to read library")
                        .with_cause(err.to_string())
                        .with_location(&file, None)
                })?;
                let library = Module::new(&engine, &bytes).map_err(|err| {
                    ErrorRecord::compile(&descriptor.id, err.to_string())
                        .with_location(&file, None)
                })?;
                linker.module(&mut store, &module_name(&file), &library).map_err(|err| {
                    ErrorRecord::load(&descriptor.id, err.to_string()).with_location(&file, None)
                })?;
            }
        }

        let instance = linker.instantiate(&mut store, &module).map_err(|err| {
            ErrorRecord::load(&descriptor.id, err.to_string())
                .with_location(&descriptor.entry_point, None)
        })?;

        let run = instance
            .get_typed_func::<(), ()>(&mut store, ENTRY_EXPORT)
            .map_err(|err| {
                ErrorRecord::load(
                    &descriptor.id,
                    format!("entry export '{ENTRY_EXPORT}' is missing or has the wrong signature"),
                )
                .with_cause(err.to_string())
                .with_location(&descriptor.entry_point, None)
            })?;

        let descriptor = descriptor.clone();

        Ok(PreparedPlugin::new(move || {
            if let Err(err) = run.call(&mut store, ()) {
                return Err(ErrorRecord::run(&descriptor.id, err.to_string())
                    .with_location(&descriptor.entry_point, None));
            }

            let pending = std::mem::take(&mut store.data_mut().pending_unloads);
            let store = Arc::new(Mutex::new(store));

            let context = WasmContext::new(Arc::clone(&store), instance);
            let mut unit = ExecutionUnit::new(descriptor, LoadedContext::Wasm(context));

            for name in pending {
                let store = Arc::clone(&store);
                let label = name.clone();
                unit.push_cleanup(CleanupAction::new(label, move || {
                    let mut guard = store.lock().map_err(|_| {
                        RunnerError::Internal("execution store lock poisoned".to_string())
                    })?;
                    let func = instance
                        .get_typed_func::<(), ()>(&mut *guard, &name)
                        .map_err(|err| RunnerError::Wasm(err.to_string()))?;
                    func.call(&mut *guard, ()).map_err(|err| RunnerError::Wasm(err.to_string()))
                }));
            }

            Ok(unit)
        }))
    }
}

impl WasmPluginRunner {
    /// Serialize the compiled module into the plugin's private output
    /// directory. Successive compiles of the same plugin overwrite only
    /// their own artifact.
    fn write_artifact(
        &self,
        descriptor: &PluginDescriptor,
        module: &Module,
    ) -> Result<(), ErrorRecord> {
        let out_dir = self.compiled_root.join(&descriptor.id);
        let write = || -> Result<(), RunnerError> {
            std::fs::create_dir_all(&out_dir)?;
            let bytes = module.serialize().map_err(|e| RunnerError::Wasm(e.to_string()))?;
            std::fs::write(out_dir.join(COMPILED_ARTIFACT), bytes)?;
            Ok(())
        };
        write().map_err(|err| {
            ErrorRecord::compile(&descriptor.id, "failed to write compiled output")
                .with_cause(err.to_string())
        })
    }
}

/// Define the `host` import surface on a linker.
fn register_host_functions(linker: &mut Linker<PluginState>) -> Result<(), wasmtime::Error> {
    linker.func_wrap(
        HOST_MODULE,
        "log",
        |mut caller: Caller<'_, PluginState>,
         level: i32,
         ptr: i32,
         len: i32|
         -> Result<(), wasmtime::Error> {
            let message = read_string(&mut caller, ptr, len)?;
            let logger = caller.data().logger.clone();
            match level {
                1 => logger.warn(&message),
                2 => logger.error(&message),
                _ => logger.info(&message),
            }
            Ok(())
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "on_unload",
        |mut caller: Caller<'_, PluginState>, ptr: i32, len: i32| -> Result<(), wasmtime::Error> {
            let export = read_string(&mut caller, ptr, len)?;
            caller.data_mut().pending_unloads.push(export);
            Ok(())
        },
    )?;

    linker.func_wrap(HOST_MODULE, "trigger_kind", |caller: Caller<'_, PluginState>| -> i32 {
        caller.data().trigger_code
    })?;

    linker.func_wrap(
        HOST_MODULE,
        "plugin_root",
        |mut caller: Caller<'_, PluginState>, ptr: i32, cap: i32| -> Result<i32, wasmtime::Error> {
            let root = caller.data().plugin_root.clone();
            let bytes = root.as_bytes();
            let writable = bytes.len().min(usize::try_from(cap).unwrap_or(0));

            let memory = exported_memory(&mut caller)?;
            let start = usize::try_from(ptr)
                .map_err(|_| wasmtime::Error::msg("negative pointer"))?;
            let end = start
                .checked_add(writable)
                .ok_or_else(|| wasmtime::Error::msg("plugin_root target out of bounds"))?;
            let data = memory.data_mut(&mut caller);
            let target = data
                .get_mut(start..end)
                .ok_or_else(|| wasmtime::Error::msg("plugin_root target out of bounds"))?;
            target.copy_from_slice(&bytes[..writable]);

            Ok(bytes.len() as i32)
        },
    )?;

    Ok(())
}

/// Read a UTF-8 string out of the caller's exported linear memory.
fn read_string(
    caller: &mut Caller<'_, PluginState>,
    ptr: i32,
    len: i32,
) -> Result<String, wasmtime::Error> {
    let memory = exported_memory(caller)?;
    let start =
        usize::try_from(ptr).map_err(|_| wasmtime::Error::msg("negative pointer"))?;
    let length =
        usize::try_from(len).map_err(|_| wasmtime::Error::msg("negative length"))?;

    let end = start
        .checked_add(length)
        .ok_or_else(|| wasmtime::Error::msg("string out of bounds"))?;
    let data = memory.data(&*caller);
    let bytes =
        data.get(start..end).ok_or_else(|| wasmtime::Error::msg("string out of bounds"))?;

    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn exported_memory(
    caller: &mut Caller<'_, PluginState>,
) -> Result<wasmtime::Memory, wasmtime::Error> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => Err(wasmtime::Error::msg("plugin does not export its linear memory")),
    }
}
