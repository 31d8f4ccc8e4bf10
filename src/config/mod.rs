//! Hierarchical configuration used to bind store options.

#[allow(clippy::module_inception)]
mod config;

pub use config::{ConfigError, Configuration};
