//! Plugin descriptors and the descriptor store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Folder names never treated as plugins (version-control and IDE metadata).
const RESERVED_FOLDERS: [&str; 4] = [".git", ".hg", ".svn", ".idea"];

/// Build-output folder skipped when the plugins root carries VCS metadata,
/// so a checked-out plugins repository's own output is not run as a plugin.
const BUILD_OUTPUT_FOLDER: &str = "target";

/// Source language a plugin is written in.
///
/// The variants are ordered by selection priority: the first-class script
/// language wins when a plugin folder carries entry points for more than
/// one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginLanguage {
    /// Rhai script, evaluated in an embedded interpreter.
    Rhai,
    /// WebAssembly text, compiled to a module before execution.
    Wasm,
}

impl PluginLanguage {
    /// All supported languages in selection priority order.
    pub fn in_priority_order() -> [Self; 2] {
        [Self::Rhai, Self::Wasm]
    }

    /// Canonical entry-point file name for this language.
    pub fn entry_point_file(&self) -> &'static str {
        match self {
            Self::Rhai => "plugin.rhai",
            Self::Wasm => "plugin.wat",
        }
    }

    /// Comment prefix used when scanning entry-point sources for directives.
    pub fn comment_prefix(&self) -> &'static str {
        match self {
            Self::Rhai => "//",
            Self::Wasm => ";;",
        }
    }

    /// File extension for downloaded dependency artifacts of this language.
    pub fn dependency_extension(&self) -> &'static str {
        match self {
            Self::Rhai => "rhai",
            Self::Wasm => "wasm",
        }
    }

    /// Get the display name for this language.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Rhai => "Rhai",
            Self::Wasm => "WebAssembly",
        }
    }
}

impl std::fmt::Display for PluginLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// One discovered, runnable plugin.
///
/// Descriptors are immutable and recreated on every discovery pass; the id
/// string is the only identity that persists across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Plugin id, derived from the folder name.
    pub id: String,
    /// Absolute root of the plugin folder.
    pub root: PathBuf,
    /// Language the plugin is written in.
    pub language: PluginLanguage,
    /// Path of the entry-point file that selected the language.
    pub entry_point: PathBuf,
}

impl PluginDescriptor {
    /// Resolve a plugin folder into a descriptor.
    ///
    /// Checks each supported language in priority order for its canonical
    /// entry-point file anywhere under the root. Returns `None` when no
    /// entry point is found for any language; callers report that as a
    /// discovery failure rather than skipping the folder silently.
    pub fn resolve(id: &str, root: &Path) -> Option<Self> {
        for language in PluginLanguage::in_priority_order() {
            if let Some(entry_point) = find_entry_point(root, language.entry_point_file()) {
                return Some(Self {
                    id: id.to_string(),
                    root: root.to_path_buf(),
                    language,
                    entry_point,
                });
            }
        }
        None
    }
}

/// List the plugins under a plugins root.
///
/// Every immediate subdirectory is a plugin, keyed by folder name, except
/// reserved metadata folders. Returns an empty map when the root does not
/// exist. The map is ordered so "run all" batches are deterministic.
pub fn list_plugins(root: &Path) -> BTreeMap<String, PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return BTreeMap::new();
    };

    let has_vcs_metadata =
        RESERVED_FOLDERS.iter().any(|reserved| root.join(reserved).is_dir());

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if is_reserved_folder(&name) {
                return None;
            }
            if has_vcs_metadata && name == BUILD_OUTPUT_FOLDER {
                return None;
            }
            Some((name, entry.path()))
        })
        .collect()
}

/// Find a language's entry-point file anywhere under a plugin root.
///
/// Plugins may organize sources into subfolders, so the search is
/// recursive; the shallowest match wins, with path order breaking ties.
pub fn find_entry_point(root: &Path, file_name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.file_type().is_file() && entry.file_name().to_str() == Some(file_name)
        })
        .map(|entry| (entry.depth(), entry.path().to_path_buf()))
        .min()
        .map(|(_, path)| path)
}

fn is_reserved_folder(name: &str) -> bool {
    name.starts_with('.') || RESERVED_FOLDERS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mkdir(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_list_plugins_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let plugins = list_plugins(&temp_dir.path().join("does-not-exist"));
        assert!(plugins.is_empty());
    }

    #[test]
    fn test_list_plugins_skips_reserved_folders() {
        let temp_dir = TempDir::new().unwrap();
        mkdir(temp_dir.path(), "hello-world");
        mkdir(temp_dir.path(), ".git");
        mkdir(temp_dir.path(), ".idea");

        let plugins = list_plugins(temp_dir.path());
        assert_eq!(plugins.len(), 1);
        assert!(plugins.contains_key("hello-world"));
    }

    #[test]
    fn test_list_plugins_skips_build_output_next_to_vcs_metadata() {
        let temp_dir = TempDir::new().unwrap();
        mkdir(temp_dir.path(), "hello-world");
        mkdir(temp_dir.path(), "target");

        // Without VCS metadata "target" is just another plugin folder.
        assert_eq!(list_plugins(temp_dir.path()).len(), 2);

        mkdir(temp_dir.path(), ".git");
        let plugins = list_plugins(temp_dir.path());
        assert_eq!(plugins.len(), 1);
        assert!(plugins.contains_key("hello-world"));
    }

    #[test]
    fn test_list_plugins_is_ordered() {
        let temp_dir = TempDir::new().unwrap();
        mkdir(temp_dir.path(), "zeta");
        mkdir(temp_dir.path(), "alpha");
        mkdir(temp_dir.path(), "mid");

        let ids: Vec<_> = list_plugins(temp_dir.path()).into_keys().collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_find_entry_point_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let nested = mkdir(temp_dir.path(), "src/scripts");
        std::fs::write(nested.join("plugin.rhai"), "1 + 1").unwrap();

        let found = find_entry_point(temp_dir.path(), "plugin.rhai").unwrap();
        assert_eq!(found, nested.join("plugin.rhai"));
    }

    #[test]
    fn test_find_entry_point_prefers_shallowest() {
        let temp_dir = TempDir::new().unwrap();
        let nested = mkdir(temp_dir.path(), "deep");
        std::fs::write(nested.join("plugin.rhai"), "2").unwrap();
        std::fs::write(temp_dir.path().join("plugin.rhai"), "1").unwrap();

        let found = find_entry_point(temp_dir.path(), "plugin.rhai").unwrap();
        assert_eq!(found, temp_dir.path().join("plugin.rhai"));
    }

    #[test]
    fn test_resolve_priority_order() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("plugin.wat"), "(module)").unwrap();
        std::fs::write(temp_dir.path().join("plugin.rhai"), "1").unwrap();

        let descriptor = PluginDescriptor::resolve("both", temp_dir.path()).unwrap();
        assert_eq!(descriptor.language, PluginLanguage::Rhai);
        assert_eq!(descriptor.entry_point, temp_dir.path().join("plugin.rhai"));
    }

    #[test]
    fn test_resolve_no_entry_point() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("readme.txt"), "not a plugin").unwrap();

        assert!(PluginDescriptor::resolve("empty", temp_dir.path()).is_none());
    }
}
