//! Host bindings injected into plugin code.
//!
//! This is the entire contract between a plugin and the host: the trigger
//! that caused the run, a logger, the plugin's own root path, and a way to
//! register cleanup actions for unload. Each pipeline exposes these through
//! its language's native surface (registered functions for Rhai, `host`
//! imports for WebAssembly); nothing else of the host is reachable from
//! plugin code.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// What caused a plugin run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// The host process started up.
    HostStartup,
    /// A user action (CLI invocation, host UI).
    UserAction,
    /// A file under the plugin folder changed (watch mode).
    FileChange,
}

impl TriggerKind {
    /// Stable numeric code handed to WebAssembly plugins.
    pub fn code(&self) -> i32 {
        match self {
            Self::HostStartup => 0,
            Self::UserAction => 1,
            Self::FileChange => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostStartup => "startup",
            Self::UserAction => "manual",
            Self::FileChange => "file-change",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The triggering event passed into every plugin's scope.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    /// Kind of trigger.
    pub kind: TriggerKind,
}

impl TriggerContext {
    pub fn startup() -> Self {
        Self { kind: TriggerKind::HostStartup }
    }

    pub fn manual() -> Self {
        Self { kind: TriggerKind::UserAction }
    }

    pub fn file_change() -> Self {
        Self { kind: TriggerKind::FileChange }
    }
}

/// Shared capture buffer for plugin log output.
///
/// Host UIs (and the integration tests) attach one to observe plugin output
/// in emission order.
pub type LogSink = Arc<Mutex<Vec<String>>>;

/// Logger handed to plugin code.
///
/// Messages go to the host's tracing output tagged with the plugin id, and
/// to the capture sink when one is attached.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: String,
    sink: Option<LogSink>,
}

impl PluginLogger {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self { plugin_id: plugin_id.into(), sink: None }
    }

    /// Attach a capture sink.
    #[must_use]
    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn info(&self, message: &str) {
        tracing::info!(plugin = %self.plugin_id, "{message}");
        self.capture(message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(plugin = %self.plugin_id, "{message}");
        self.capture(message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(plugin = %self.plugin_id, "{message}");
        self.capture(message);
    }

    fn capture(&self, message: &str) {
        if let Some(sink) = &self.sink {
            if let Ok(mut lines) = sink.lock() {
                lines.push(message.to_string());
            }
        }
    }
}

/// The fixed binding set injected into one plugin run.
#[derive(Debug, Clone)]
pub struct HostBindings {
    /// The event that triggered the run.
    pub trigger: TriggerContext,
    /// Plugin-scoped logger.
    pub logger: PluginLogger,
    /// Root folder of the plugin being run.
    pub plugin_root: PathBuf,
}

impl HostBindings {
    pub fn new(trigger: TriggerContext, logger: PluginLogger, plugin_root: PathBuf) -> Self {
        Self { trigger, logger, plugin_root }
    }
}
