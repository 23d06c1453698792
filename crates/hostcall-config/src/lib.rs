#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Configuration for the hostcall runtime.
//!
//! A single [`Config`] covers instance limits, manifest policy, pool sizing
//! and logging.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hostcall_config::Config;
//!
//! // defaults → user config → ./hostcall.toml → HOSTCALL_* env
//! let config = Config::load(Some(std::path::Path::new("hostcall.toml"))).unwrap();
//! println!("Max instances: {}", config.pool.max_instances);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment variables** (`HOSTCALL_<SECTION>_<KEY>`)
//! 2. **Explicit file** passed to [`Config::load`]
//! 3. **User** (`<config dir>/hostcall/config.toml`)
//! 4. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! This crate has no dependencies on other hostcall crates; conversion to
//! runtime types happens in `hostcall-runtime`.

/// Environment variable overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// See [`loader::load`] for the algorithm.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load(file: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(file)
    }

    /// Load a single file without layering.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns a [`toml::ser::Error`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
