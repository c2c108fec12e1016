//! Core host infrastructure.
//!
//! This module contains the pieces every other part of the host relies on:
//! configuration loading and the canonical set of filesystem locations the
//! runner works with.

mod config;
mod paths;

pub use config::{Config, GeneralConfig, PathsConfig};
pub use paths::HostPaths;
