//! Classpath assembly.
//!
//! Every plugin runs against an ordered list of binary locations: the host
//! platform libraries, the runner support libraries bundled with the host,
//! the plugin's own `lib/` folder, and whatever the entry-point source
//! declares through `depends-on` directives. Order is precedence: entries
//! appended later shadow earlier ones when module names collide, so a
//! user-declared dependency always wins over a bundled default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::core::HostPaths;
use crate::plugin::PluginDescriptor;

use super::{DependencyResolver, ErrorRecord, RunnerError};

/// Directive marker recognized inside entry-point sources.
pub const DEPENDENCY_DIRECTIVE: &str = "depends-on";

/// Name of the optional per-plugin library folder.
pub const PLUGIN_LIB_FOLDER: &str = "lib";

/// Where a classpath entry came from. Listed in precedence order, lowest
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClasspathOrigin {
    /// Host platform library directory.
    HostLib,
    /// Runner support libraries shipped with the host.
    SupportLib,
    /// The plugin's own `lib/` folder.
    PluginLib,
    /// A dependency declared in the entry-point source.
    Declared,
}

impl std::fmt::Display for ClasspathOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::HostLib => "host-lib",
            Self::SupportLib => "support-lib",
            Self::PluginLib => "plugin-lib",
            Self::Declared => "declared",
        };
        write!(f, "{name}")
    }
}

/// One binary location on a plugin's classpath. The path is either a
/// directory of library modules or a single module file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClasspathEntry {
    /// Directory or file backing this entry.
    pub path: PathBuf,
    /// Which layer of the classpath contributed it.
    pub origin: ClasspathOrigin,
}

impl ClasspathEntry {
    pub fn new(path: impl Into<PathBuf>, origin: ClasspathOrigin) -> Self {
        Self { path: path.into(), origin }
    }
}

/// A parsed `depends-on` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySpec {
    /// A file path, resolved relative to the plugin root.
    Local(PathBuf),
    /// A registry coordinate, downloaded into the per-host cache.
    Remote {
        /// Artifact name.
        name: String,
        /// Artifact version.
        version: String,
        /// Optional sha256 pin for the downloaded bytes.
        checksum: Option<String>,
    },
}

impl DependencySpec {
    /// Parse the argument of one `depends-on` directive.
    ///
    /// A target containing `:` is a `name:version` registry coordinate;
    /// anything else is a local path. An optional trailing `sha256=<hex>`
    /// token pins the download.
    pub fn parse(args: &str) -> Result<Self, RunnerError> {
        let mut tokens = args.split_whitespace();
        let Some(target) = tokens.next() else {
            return Err(RunnerError::Directive("missing dependency target".to_string()));
        };

        let checksum = match tokens.next() {
            Some(token) => match token.strip_prefix("sha256=") {
                Some(hex) if !hex.is_empty() => Some(hex.to_ascii_lowercase()),
                _ => {
                    return Err(RunnerError::Directive(format!(
                        "unrecognized directive token '{token}'"
                    )))
                }
            },
            None => None,
        };
        if let Some(extra) = tokens.next() {
            return Err(RunnerError::Directive(format!("unexpected trailing token '{extra}'")));
        }

        if target.contains(':') {
            let mut parts = target.splitn(2, ':');
            let name = parts.next().unwrap_or_default();
            let version = parts.next().unwrap_or_default();
            if name.is_empty() || version.is_empty() {
                return Err(RunnerError::Directive(format!(
                    "coordinate '{target}' is not of the form name:version"
                )));
            }
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
                return Err(RunnerError::Directive(format!(
                    "coordinate name '{name}' contains unsupported characters"
                )));
            }
            Ok(Self::Remote {
                name: name.to_string(),
                version: version.to_string(),
                checksum,
            })
        } else {
            if checksum.is_some() {
                return Err(RunnerError::Directive(
                    "checksum pins only apply to registry coordinates".to_string(),
                ));
            }
            Ok(Self::Local(PathBuf::from(target)))
        }
    }
}

impl std::fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote { name, version, .. } => write!(f, "{name}:{version}"),
        }
    }
}

/// Scan an entry-point source for dependency directives.
///
/// A directive is a single comment line: the language's comment prefix,
/// the `depends-on` marker, then the target.
pub fn scan_directives(
    entry_point: &Path,
    comment_prefix: &str,
) -> Result<Vec<DependencySpec>, RunnerError> {
    let source = std::fs::read_to_string(entry_point)?;
    let mut specs = Vec::new();

    for line in source.lines() {
        let Some(comment) = line.trim_start().strip_prefix(comment_prefix) else {
            continue;
        };
        let Some(args) = comment.trim_start().strip_prefix(DEPENDENCY_DIRECTIVE) else {
            continue;
        };
        // The marker must be a whole word; `depends-online` is not a directive.
        if !args.starts_with(char::is_whitespace) {
            continue;
        }
        specs.push(DependencySpec::parse(args.trim())?);
    }

    Ok(specs)
}

/// Assemble the ordered classpath for one plugin.
///
/// Resolution failures of declared dependencies are compile-phase errors
/// scoped to this plugin; they never affect the rest of a batch.
pub fn assemble_classpath(
    descriptor: &PluginDescriptor,
    paths: &HostPaths,
    resolver: &DependencyResolver,
) -> Result<Vec<ClasspathEntry>, ErrorRecord> {
    let mut entries = vec![
        ClasspathEntry::new(paths.host_lib_dir(), ClasspathOrigin::HostLib),
        ClasspathEntry::new(paths.support_lib_dir(), ClasspathOrigin::SupportLib),
    ];

    let plugin_lib = descriptor.root.join(PLUGIN_LIB_FOLDER);
    if plugin_lib.is_dir() {
        entries.push(ClasspathEntry::new(plugin_lib, ClasspathOrigin::PluginLib));
    }

    let specs = scan_directives(&descriptor.entry_point, descriptor.language.comment_prefix())
        .map_err(|err| {
            ErrorRecord::compile(&descriptor.id, "failed to read dependency directives")
                .with_cause(err.to_string())
                .with_location(&descriptor.entry_point, None)
        })?;

    for spec in specs {
        let extension = descriptor.language.dependency_extension();
        let resolved =
            resolver.resolve(&spec, &descriptor.root, extension).map_err(|err| {
                ErrorRecord::compile(
                    &descriptor.id,
                    format!("failed to resolve declared dependency '{spec}'"),
                )
                .with_cause(err.to_string())
                .with_location(&descriptor.entry_point, None)
            })?;
        entries.push(ClasspathEntry::new(resolved, ClasspathOrigin::Declared));
    }

    Ok(dedup_entries(entries))
}

/// Expand a classpath entry into the library module files it contributes.
///
/// A file entry contributes itself when its extension matches; a directory
/// entry contributes its matching files in sorted order. Entries pointing
/// at nothing on disk contribute nothing (the host and support library
/// directories are always on the classpath whether or not they exist yet).
pub(crate) fn module_files(entry: &ClasspathEntry, extensions: &[&str]) -> Vec<PathBuf> {
    let matches = |path: &Path| {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext))
    };

    if entry.path.is_file() {
        return if matches(&entry.path) { vec![entry.path.clone()] } else { Vec::new() };
    }

    let Ok(dir) = std::fs::read_dir(&entry.path) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = dir
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|path| path.is_file() && matches(path))
        .collect();
    files.sort();
    files
}

/// Module name a library file is linked under: its file stem.
pub(crate) fn module_name(path: &Path) -> String {
    path.file_stem().map_or_else(String::new, |stem| stem.to_string_lossy().into_owned())
}

/// Drop later duplicates of the same normalized path, keeping append order.
fn dedup_entries(entries: Vec<ClasspathEntry>) -> Vec<ClasspathEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(normalize(&entry.path)))
        .collect()
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginLanguage;
    use tempfile::TempDir;

    #[test]
    fn test_parse_local_path() {
        let spec = DependencySpec::parse("vendor/util.rhai").unwrap();
        assert_eq!(spec, DependencySpec::Local(PathBuf::from("vendor/util.rhai")));
    }

    #[test]
    fn test_parse_coordinate() {
        let spec = DependencySpec::parse("text-tools:1.2.0").unwrap();
        assert_eq!(
            spec,
            DependencySpec::Remote {
                name: "text-tools".to_string(),
                version: "1.2.0".to_string(),
                checksum: None,
            }
        );
    }

    #[test]
    fn test_parse_coordinate_with_checksum() {
        let spec = DependencySpec::parse("text-tools:1.2.0 sha256=ABCDEF").unwrap();
        let DependencySpec::Remote { checksum, .. } = spec else {
            panic!("expected remote spec");
        };
        assert_eq!(checksum.as_deref(), Some("abcdef"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(DependencySpec::parse("").is_err());
        assert!(DependencySpec::parse(":1.0").is_err());
        assert!(DependencySpec::parse("name:").is_err());
        assert!(DependencySpec::parse("a b c").is_err());
        assert!(DependencySpec::parse("local/path.rhai sha256=ff").is_err());
        assert!(DependencySpec::parse("weird/name:1.0").is_err());
    }

    #[test]
    fn test_scan_directives() {
        let temp_dir = TempDir::new().unwrap();
        let entry = temp_dir.path().join("plugin.rhai");
        std::fs::write(
            &entry,
            "// depends-on vendor/util.rhai\nlet x = 1;\n// just a comment\n// depends-on text-tools:1.2.0\n",
        )
        .unwrap();

        let specs = scan_directives(&entry, "//").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0], DependencySpec::Local(PathBuf::from("vendor/util.rhai")));
    }

    #[test]
    fn test_scan_directives_wat_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let entry = temp_dir.path().join("plugin.wat");
        std::fs::write(&entry, ";; depends-on mathlib:0.3.0\n(module)\n").unwrap();

        let specs = scan_directives(&entry, ";;").unwrap();
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn test_assemble_order_and_lib_detection() {
        let temp_dir = TempDir::new().unwrap();
        let paths = crate::core::HostPaths::with_base(&temp_dir.path().join("host"));
        paths.ensure_layout().unwrap();
        let resolver = DependencyResolver::new(paths.dependency_cache().to_path_buf()).unwrap();

        let root = temp_dir.path().join("plugins/demo");
        std::fs::create_dir_all(root.join("lib")).unwrap();
        std::fs::write(root.join("plugin.rhai"), "// depends-on vendor/util.rhai\n").unwrap();
        std::fs::create_dir_all(root.join("vendor")).unwrap();
        std::fs::write(root.join("vendor/util.rhai"), "fn tag() { \"v\" }\n").unwrap();

        let descriptor = PluginDescriptor::resolve("demo", &root).unwrap();
        assert_eq!(descriptor.language, PluginLanguage::Rhai);

        let classpath = assemble_classpath(&descriptor, &paths, &resolver).unwrap();
        let origins: Vec<_> = classpath.iter().map(|e| e.origin).collect();
        assert_eq!(
            origins,
            vec![
                ClasspathOrigin::HostLib,
                ClasspathOrigin::SupportLib,
                ClasspathOrigin::PluginLib,
                ClasspathOrigin::Declared,
            ]
        );
    }

    #[test]
    fn test_assemble_dedups_by_path() {
        let temp_dir = TempDir::new().unwrap();
        let paths = crate::core::HostPaths::with_base(&temp_dir.path().join("host"));
        paths.ensure_layout().unwrap();
        let resolver = DependencyResolver::new(paths.dependency_cache().to_path_buf()).unwrap();

        // Declares the same file twice; only one entry must survive.
        let root = temp_dir.path().join("plugins/demo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join("plugin.rhai"),
            "// depends-on util.rhai\n// depends-on util.rhai\n",
        )
        .unwrap();
        std::fs::write(root.join("util.rhai"), "fn tag() { \"v\" }\n").unwrap();

        let descriptor = PluginDescriptor::resolve("demo", &root).unwrap();
        let classpath = assemble_classpath(&descriptor, &paths, &resolver).unwrap();
        let declared: Vec<_> =
            classpath.iter().filter(|e| e.origin == ClasspathOrigin::Declared).collect();
        assert_eq!(declared.len(), 1);
    }

    #[test]
    fn test_assemble_missing_local_dependency_is_compile_error() {
        let temp_dir = TempDir::new().unwrap();
        let paths = crate::core::HostPaths::with_base(&temp_dir.path().join("host"));
        paths.ensure_layout().unwrap();
        let resolver = DependencyResolver::new(paths.dependency_cache().to_path_buf()).unwrap();

        let root = temp_dir.path().join("plugins/demo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("plugin.rhai"), "// depends-on missing.rhai\n").unwrap();

        let descriptor = PluginDescriptor::resolve("demo", &root).unwrap();
        let err = assemble_classpath(&descriptor, &paths, &resolver).unwrap_err();
        assert_eq!(err.phase, crate::runner::Phase::Compile);
        assert_eq!(err.plugin_id, "demo");
    }
}
