//! Configuration management for the plugin host.
//!
//! Handles loading and saving configuration from TOML files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::HostPaths;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Filesystem layout overrides
    pub paths: PathsConfig,
}

/// General host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Whether `watch` runs every plugin once before watching for changes
    pub run_all_on_startup: bool,

    /// Registry base URL for resolving declared dependency coordinates
    pub registry_url: Option<String>,
}

/// Filesystem layout overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory for the whole host layout (plugins, libs, caches)
    pub home: Option<PathBuf>,

    /// Plugins root, when it should live outside the host home
    pub plugins_root: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.sparkplug.toml` in current directory
    /// 2. `~/.config/sparkplug/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        // Try local config first
        let local_config = PathBuf::from(".sparkplug.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        // Try global config
        if let Some(config_dir) = dirs::config_dir() {
            let global_config = config_dir.join(crate::APP_NAME).join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        // Return defaults
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the global config file.
    pub fn save(&self) -> anyhow::Result<()> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        let app_dir = config_dir.join(crate::APP_NAME);
        std::fs::create_dir_all(&app_dir)?;

        let config_path = app_dir.join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(crate::APP_NAME))
    }

    /// Resolve the host path layout this configuration describes.
    pub fn host_paths(&self) -> HostPaths {
        let mut paths = match &self.paths.home {
            Some(home) => HostPaths::with_base(home),
            None => HostPaths::discover(),
        };
        if let Some(root) = &self.paths.plugins_root {
            paths = paths.with_plugins_root(root.clone());
        }
        paths
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { run_all_on_startup: false, registry_url: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.general.run_all_on_startup);
        assert!(config.general.registry_url.is_none());
        assert!(config.paths.home.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[general]
run_all_on_startup = true
registry_url = "https://plugins.example.com/artifacts"

[paths]
home = "/srv/sparkplug"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.general.run_all_on_startup);
        assert_eq!(
            config.general.registry_url.as_deref(),
            Some("https://plugins.example.com/artifacts")
        );
        assert_eq!(config.paths.home.as_deref(), Some(std::path::Path::new("/srv/sparkplug")));
    }

    #[test]
    fn test_host_paths_respects_home() {
        let toml_str = r#"
[paths]
home = "/srv/sparkplug"
plugins_root = "/src/plugins"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let paths = config.host_paths();
        assert_eq!(paths.plugins_root(), std::path::Path::new("/src/plugins"));
        assert_eq!(paths.support_lib_dir(), std::path::Path::new("/srv/sparkplug/support-lib"));
    }

    #[test]
    fn test_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.general.run_all_on_startup, config.general.run_all_on_startup);
    }
}
