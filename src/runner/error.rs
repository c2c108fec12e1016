//! Runner error types.
//!
//! Failures travel in two shapes. [`RunnerError`] is the internal error for
//! fallible helpers (dependency resolution, cleanup actions). [`ErrorRecord`]
//! is the unit of reporting: every pipeline stage converts its failures into
//! records scoped to one plugin id, and nothing is ever thrown across a
//! plugin boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Internal errors raised by runner helpers before they are converted into
/// per-plugin [`ErrorRecord`]s.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error (dependency downloads).
    #[error("Network error: {0}")]
    Network(String),

    /// Validation error (e.g. checksum mismatch).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed dependency directive.
    #[error("Malformed dependency directive: {0}")]
    Directive(String),

    /// A declared local dependency does not exist.
    #[error("Dependency not found: {0}")]
    DependencyNotFound(PathBuf),

    /// Script evaluation error.
    #[error("Script error: {0}")]
    Script(String),

    /// WebAssembly compilation or execution error.
    #[error("WASM error: {0}")]
    Wasm(String),

    /// Host bookkeeping failure. Indicates a bug in the host, not a broken
    /// plugin.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stage of the run pipeline a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Resolving the plugin folder or its entry point.
    Discovery,
    /// Compiling sources, including declared dependency resolution.
    Compile,
    /// Instantiating the isolated loading context.
    Load,
    /// Executing the entry point or a registered cleanup action.
    Run,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Compile => "compile",
            Self::Load => "load",
            Self::Run => "run",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source position a failure points at, when the compiler or interpreter
/// supplies one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// File the failure was reported against.
    pub file: PathBuf,
    /// 1-based line, when known.
    pub line: Option<u32>,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.file.display()),
            None => write!(f, "{}", self.file.display()),
        }
    }
}

/// One failure scoped to one plugin.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// Id of the plugin the failure belongs to.
    pub plugin_id: String,
    /// Pipeline stage that produced the failure.
    pub phase: Phase,
    /// Human-readable description.
    pub message: String,
    /// Underlying cause, when distinct from the message.
    pub cause: Option<String>,
    /// Source location hint, when derivable.
    pub location: Option<SourceLocation>,
}

impl ErrorRecord {
    pub fn new(plugin_id: impl Into<String>, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            phase,
            message: message.into(),
            cause: None,
            location: None,
        }
    }

    /// Discovery-phase record.
    pub fn discovery(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin_id, Phase::Discovery, message)
    }

    /// Compile-phase record.
    pub fn compile(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin_id, Phase::Compile, message)
    }

    /// Load-phase record.
    pub fn load(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin_id, Phase::Load, message)
    }

    /// Run-phase record.
    pub fn run(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin_id, Phase::Run, message)
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attach a source location hint.
    #[must_use]
    pub fn with_location(mut self, file: impl Into<PathBuf>, line: Option<u32>) -> Self {
        self.location = Some(SourceLocation { file: file.into(), line });
        self
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.phase, self.plugin_id, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Discovery.to_string(), "discovery");
        assert_eq!(Phase::Run.to_string(), "run");
    }

    #[test]
    fn test_record_display() {
        let record = ErrorRecord::compile("demo", "unexpected token")
            .with_location("/plugins/demo/plugin.rhai", Some(3))
            .with_cause("syntax error");

        let rendered = record.to_string();
        assert!(rendered.contains("[compile] demo: unexpected token"));
        assert!(rendered.contains("plugin.rhai:3"));
        assert!(rendered.contains("syntax error"));
    }

    #[test]
    fn test_location_without_line() {
        let location =
            SourceLocation { file: PathBuf::from("/plugins/demo/plugin.wat"), line: None };
        assert_eq!(location.to_string(), "/plugins/demo/plugin.wat");
    }
}
