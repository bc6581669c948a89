//! Configuration loading and management.

mod loader;

pub use loader::{Config, ConfigError, HostSettings, Settings, example_config, generate_config};
