// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./chatbridge.toml` > `~/.config/chatbridge/chatbridge.toml`
//! > `/etc/chatbridge/chatbridge.toml` with environment variable overrides via
//! the `CHATBRIDGE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::diagnostic::section_names;
use crate::model::ChatbridgeConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/chatbridge/chatbridge.toml` (system-wide)
/// 3. `~/.config/chatbridge/chatbridge.toml` (user XDG config)
/// 4. `./chatbridge.toml` (local directory)
/// 5. `CHATBRIDGE_*` environment variables
pub fn load_config() -> Result<ChatbridgeConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<ChatbridgeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ChatbridgeConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ChatbridgeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ChatbridgeConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Config files in merge order: system, user, then the working directory.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/chatbridge/chatbridge.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("chatbridge/chatbridge.toml"));
    }
    let local = std::env::current_dir()
        .map(|d| d.join("chatbridge.toml"))
        .unwrap_or_else(|_| PathBuf::from("chatbridge.toml"));
    paths.push(local);
    paths
}

fn build_figment() -> Figment {
    search_paths()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(ChatbridgeConfig::default())),
            |figment, path| figment.merge(Toml::file(path)),
        )
        .merge(env_provider())
}

/// Create the environment variable provider.
///
/// Uses `Env::map()` rather than `Env::split("_")` because field names contain
/// underscores: `CHATBRIDGE_BRIDGE_POLL_TIMEOUT_MS` must map to
/// `bridge.poll_timeout_ms`, not `bridge.poll.timeout.ms`.
fn env_provider() -> Env {
    Env::prefixed("CHATBRIDGE_").map(|key| map_env_key(key.as_str()).into())
}

/// Turn `section_field` into `section.field` for known sections only.
fn map_env_key(key: &str) -> String {
    for section in section_names() {
        if let Some(field) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{field}");
        }
    }
    key.to_string()
}
