// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chatbridge configuration: `[broker]`, `[bridge]`, `[gateway]`, `[media]`
//! and `[logging]` sections read from TOML with `CHATBRIDGE_*` overrides.
//!
//! Parse failures and invalid values come back as [`ConfigError`] diagnostics
//! naming the offending `section.key`.
//!
//! ```no_run
//! let config = match chatbridge_config::load_and_validate() {
//!     Ok(config) => config,
//!     Err(errors) => {
//!         chatbridge_config::render_errors(&errors);
//!         std::process::exit(1);
//!     }
//! };
//! println!("broker at {}:{}", config.broker.host, config.broker.port);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, ConfigSource, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::ChatbridgeConfig;

/// Load from the XDG hierarchy plus `CHATBRIDGE_*` overrides, then validate.
pub fn load_and_validate() -> Result<ChatbridgeConfig, Vec<ConfigError>> {
    checked(loader::load_config(), || {
        loader::search_paths()
            .iter()
            .filter_map(|path| ConfigSource::read(path))
            .collect()
    })
}

/// Load an explicit file plus env overrides, then validate.
pub fn load_and_validate_path(path: &Path) -> Result<ChatbridgeConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_path(path), || {
        ConfigSource::read(path).into_iter().collect()
    })
}

pub fn load_and_validate_str(toml_content: &str) -> Result<ChatbridgeConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_str(toml_content), || {
        vec![ConfigSource::inline(toml_content)]
    })
}

/// Validate a parsed config, or explain why it did not parse. The sources
/// are only read back when there is an error to point into.
#[allow(clippy::result_large_err)]
fn checked(
    parsed: Result<ChatbridgeConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<ConfigSource>,
) -> Result<ChatbridgeConfig, Vec<ConfigError>> {
    let config = parsed.map_err(|err| diagnostic::from_figment(err, &sources()))?;
    validation::validate_config(&config)?;
    Ok(config)
}
