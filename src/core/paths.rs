//! Canonical filesystem locations for the plugin host.
//!
//! Everything the runner touches on disk hangs off a small set of
//! directories: the plugins root the user authors into, the two library
//! directories that seed every classpath, the per-plugin compiled output
//! root, and the process-wide dependency download cache.

use std::io;
use std::path::{Path, PathBuf};

/// The set of directories the plugin host works with.
///
/// By default everything lives under the platform data directory
/// (`~/.local/share/sparkplug` on Linux) except the dependency cache, which
/// goes to the platform cache directory. `with_base` roots the whole layout
/// under one directory instead, which is what tests and the `--home` flag
/// use.
#[derive(Debug, Clone)]
pub struct HostPaths {
    plugins_root: PathBuf,
    host_lib_dir: PathBuf,
    support_lib_dir: PathBuf,
    compiled_root: PathBuf,
    dependency_cache: PathBuf,
}

impl HostPaths {
    /// Resolve the default layout from the platform directories.
    ///
    /// Falls back to `.sparkplug` in the current directory when the platform
    /// provides no data directory (some minimal containers).
    pub fn discover() -> Self {
        let data = dirs::data_dir()
            .map_or_else(|| PathBuf::from(".sparkplug"), |d| d.join(crate::APP_NAME));
        let cache = dirs::cache_dir().map_or_else(|| data.join("cache"), |d| d.join(crate::APP_NAME));

        Self {
            plugins_root: data.join("plugins"),
            host_lib_dir: data.join("host-lib"),
            support_lib_dir: data.join("support-lib"),
            compiled_root: data.join("compiled"),
            dependency_cache: cache.join("deps"),
        }
    }

    /// Root the entire layout under a single base directory.
    pub fn with_base(base: &Path) -> Self {
        Self {
            plugins_root: base.join("plugins"),
            host_lib_dir: base.join("host-lib"),
            support_lib_dir: base.join("support-lib"),
            compiled_root: base.join("compiled"),
            dependency_cache: base.join("deps"),
        }
    }

    /// Override the plugins root (config `paths.plugins_root`).
    pub fn with_plugins_root(mut self, root: PathBuf) -> Self {
        self.plugins_root = root;
        self
    }

    /// Directory containing one subfolder per plugin.
    pub fn plugins_root(&self) -> &Path {
        &self.plugins_root
    }

    /// Host platform libraries, first on every classpath.
    pub fn host_lib_dir(&self) -> &Path {
        &self.host_lib_dir
    }

    /// Runner support libraries bundled with the host itself.
    pub fn support_lib_dir(&self) -> &Path {
        &self.support_lib_dir
    }

    /// Root for per-plugin compiled output directories.
    pub fn compiled_root(&self) -> &Path {
        &self.compiled_root
    }

    /// Per-plugin private output directory for compiled artifacts.
    pub fn compiled_dir(&self, plugin_id: &str) -> PathBuf {
        self.compiled_root.join(plugin_id)
    }

    /// Process-wide download cache for declared dependencies.
    pub fn dependency_cache(&self) -> &Path {
        &self.dependency_cache
    }

    /// Create every directory in the layout that does not exist yet.
    pub fn ensure_layout(&self) -> io::Result<()> {
        for dir in [
            &self.plugins_root,
            &self.host_lib_dir,
            &self.support_lib_dir,
            &self.compiled_root,
            &self.dependency_cache,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
