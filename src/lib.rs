//! # Sparkplug
//!
//! Live plugin host - author small script plugins on disk and run, reload,
//! and unload them without restarting the host process.
//!
//! Sparkplug watches a plugins root directory where every subfolder is one
//! plugin. A plugin is written in one of the supported script languages
//! (Rhai or WebAssembly text), identified by its canonical entry-point file.
//! The runner core compiles the plugin against its assembled classpath,
//! executes it inside a fresh isolated context, and tears the previous
//! incarnation down on every reload.
//!
//! ## Features
//!
//! - **Hot Reload**: rerun a plugin and the prior execution unit is unloaded
//!   first, cleanup actions and all
//! - **Multi-Language**: Rhai scripts and WebAssembly modules behind one
//!   runner interface
//! - **Dependency Directives**: plugins declare extra libraries with a
//!   one-line `depends-on` marker (local files or registry coordinates)
//! - **Error Containment**: one broken plugin never blocks the rest of a
//!   batch; failures aggregate into a per-plugin report
//!
//! ## Quick Start
//!
//! ```bash
//! # Install
//! cargo install sparkplug
//!
//! # Run every plugin under the plugins root
//! sparkplug run --all
//!
//! # Keep running, reloading plugins as their files change
//! sparkplug watch
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_const_for_fn)]

pub mod core;
pub mod plugin;
pub mod runner;

pub use crate::core::{Config, HostPaths};
pub use plugin::{list_plugins, PluginDescriptor, PluginLanguage};
pub use runner::{
    assemble_classpath, create_runners, ClasspathEntry, ClasspathOrigin, CleanupAction,
    DependencyResolver, DependencySpec, ErrorRecord, ErrorReport, ErrorReporter, ExecutionUnit,
    HostBindings, LifecycleManager, LogSink, Phase, PluginLogger, PluginRunner, PreparedPlugin,
    RhaiPluginRunner, RunRequest, RunnerError, RunnerHost, SourceLocation, TriggerContext,
    TriggerKind, WasmPluginRunner,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "sparkplug";
