//! Plugin discovery.
//!
//! A plugin is a folder under the plugins root; the folder name is the
//! plugin id. This module resolves the root into named plugins and decides
//! which supported language each plugin is written in by looking for the
//! language's canonical entry-point file.
//!
//! Descriptors are recomputed on every discovery pass so that filesystem
//! changes (new plugins, deleted plugins, entry points switching language)
//! are always picked up.

mod descriptor;

pub use descriptor::{find_entry_point, list_plugins, PluginDescriptor, PluginLanguage};
