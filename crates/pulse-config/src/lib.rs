//! Pulse configuration system.
//!
//! Provides TOML-based configuration for the presence agent and the
//! development relay. All sections use sensible defaults so partial
//! configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pulse_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("endpoint: {}", config.transport.endpoint);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

// Re-export core types for convenience
pub use schema::{PulseConfig, CONFIG_SCHEMA_VERSION};
pub use toml_loader::{load_from_path, default_config_path};

use pulse_common::ConfigError;

/// Convenience function to load config from the platform default path.
///
/// Loads `config.toml` from the OS config directory, creates a default
/// if none exists, and validates the result.
pub fn load_config() -> Result<PulseConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}
