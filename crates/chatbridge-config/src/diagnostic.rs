// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Config errors as miette diagnostics.
//!
//! Figment only knows the field list of the struct it was filling, so this
//! module keeps its own table of every section's keys. A key filed under the
//! wrong section is pointed at the right one, and typos get the closest
//! key of their own section.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use std::fmt::Write as _;
use std::path::Path;

use figment::error::Kind;
use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler score a key must reach to be offered as a correction.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Keys accepted in each section of `chatbridge.toml`.
pub const SECTION_KEYS: &[(&str, &[&str])] = &[
    (
        "broker",
        &[
            "host",
            "port",
            "vhost",
            "username",
            "password",
            "outbound_exchange",
            "inbound_exchange",
            "connect_timeout_secs",
        ],
    ),
    (
        "bridge",
        &[
            "accepted_kinds",
            "poll_timeout_ms",
            "max_poll_timeout_ms",
            "buffer_capacity",
            "prefetch",
            "max_sessions",
            "durable_queue_prefix",
            "reconnect_initial_ms",
            "reconnect_max_ms",
            "teardown_step_timeout_ms",
            "subscribe_wait_ms",
            "idle_timeout_secs",
        ],
    ),
    ("gateway", &["host", "port", "max_upload_bytes"]),
    ("media", &["upload_url", "api_key", "user", "timeout_secs"]),
    ("logging", &["level"]),
];

pub fn section_names() -> impl Iterator<Item = &'static str> {
    SECTION_KEYS.iter().map(|(name, _)| *name)
}

fn section_keys(section: &str) -> &'static [&'static str] {
    SECTION_KEYS
        .iter()
        .find(|(name, _)| *name == section)
        .map(|(_, keys)| *keys)
        .unwrap_or_default()
}

/// A TOML document the config was read from, kept to point errors at.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub name: String,
    pub content: String,
}

impl ConfigSource {
    /// Read `path`; `None` when the file does not exist or is unreadable.
    pub fn read(path: &Path) -> Option<Self> {
        std::fs::read_to_string(path).ok().map(|content| Self {
            name: path.display().to_string(),
            content,
        })
    }

    pub fn inline(content: &str) -> Self {
        Self {
            name: "<inline>".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown key `{key}` in [{section}]")]
    #[diagnostic(code(chatbridge::config::unknown_key), help("{hint}"))]
    UnknownKey {
        section: String,
        key: String,
        /// Closest key of the same section, if any is close enough.
        suggestion: Option<String>,
        hint: String,
        #[label("not recognized here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("unknown section [{name}]")]
    #[diagnostic(code(chatbridge::config::unknown_section), help("{hint}"))]
    UnknownSection {
        name: String,
        suggestion: Option<String>,
        hint: String,
        #[label("not a chatbridge section")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` has the wrong type: found {found}")]
    #[diagnostic(code(chatbridge::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        key: String,
        found: String,
        expected: String,
        #[label("wrong type here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that parsed but is not acceptable.
    #[error("invalid `{key}`: {reason}")]
    #[diagnostic(code(chatbridge::config::invalid_value))]
    InvalidValue { key: String, reason: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(chatbridge::config::other))]
    Other(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// The dotted key (or section name) the error is about.
    pub fn key(&self) -> Option<String> {
        match self {
            Self::UnknownKey { section, key, .. } => Some(format!("{section}.{key}")),
            Self::UnknownSection { name, .. } => Some(name.clone()),
            Self::InvalidType { key, .. } | Self::InvalidValue { key, .. } => Some(key.clone()),
            Self::Other(_) => None,
        }
    }
}

/// Convert a figment extraction failure into diagnostics, one per error.
pub fn from_figment(err: figment::Error, sources: &[ConfigSource]) -> Vec<ConfigError> {
    err.into_iter()
        .map(|error| {
            let source = pick_source(&error, sources);
            let mut path: Vec<&str> = error.path.iter().map(String::as_str).collect();
            match &error.kind {
                Kind::UnknownField(field, _) => {
                    if path.last() == Some(&field.as_str()) {
                        path.pop();
                    }
                    match path.first() {
                        Some(section) => unknown_key(section, field, source),
                        None => unknown_section(field, source),
                    }
                }
                Kind::InvalidType(found, expected) | Kind::InvalidValue(found, expected) => {
                    let (span, src) = match path.as_slice() {
                        [section, key, ..] => locate(source, Some(*section), key),
                        _ => (None, None),
                    };
                    ConfigError::InvalidType {
                        key: path.join("."),
                        found: found.to_string(),
                        expected: expected.clone(),
                        span,
                        src,
                    }
                }
                Kind::UnknownVariant(value, expected) => ConfigError::invalid(
                    &path.join("."),
                    format!(
                        "unknown value `{value}`, expected one of: {}",
                        expected.join(", ")
                    ),
                ),
                _ => ConfigError::Other(error.to_string()),
            }
        })
        .collect()
}

fn unknown_key(section: &str, key: &str, source: Option<&ConfigSource>) -> ConfigError {
    let valid = section_keys(section);
    let suggestion = suggest_key(key, valid);
    let home = SECTION_KEYS
        .iter()
        .find(|(name, keys)| *name != section && keys.contains(&key))
        .map(|(name, _)| *name);
    let hint = match (home, &suggestion) {
        (Some(home), _) => format!("`{key}` belongs in [{home}]"),
        (None, Some(s)) => format!("did you mean `{s}`? [{section}] accepts: {}", valid.join(", ")),
        (None, None) => format!("[{section}] accepts: {}", valid.join(", ")),
    };
    let (span, src) = locate(source, Some(section), key);
    ConfigError::UnknownKey {
        section: section.to_string(),
        key: key.to_string(),
        suggestion,
        hint,
        span,
        src,
    }
}

fn unknown_section(name: &str, source: Option<&ConfigSource>) -> ConfigError {
    let sections: Vec<&str> = section_names().collect();
    let suggestion = suggest_key(name, &sections);
    let hint = match &suggestion {
        Some(s) => format!("did you mean [{s}]?"),
        None => format!("sections are: {}", sections.join(", ")),
    };
    let header = format!("[{name}]");
    let (span, src) = match source.and_then(|s| s.content.find(&header).map(|at| (s, at))) {
        Some((source, at)) => (
            Some(SourceSpan::new((at + 1).into(), name.len())),
            Some(NamedSource::new(&source.name, source.content.clone())),
        ),
        None => (None, None),
    };
    ConfigError::UnknownSection {
        name: name.to_string(),
        suggestion,
        hint,
        span,
        src,
    }
}

/// The document an error came from: by file path, or the only one given.
fn pick_source<'a>(error: &figment::Error, sources: &'a [ConfigSource]) -> Option<&'a ConfigSource> {
    let file = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| s.file_path())
        .map(|p| p.display().to_string());
    file.and_then(|path| sources.iter().find(|s| s.name == path))
        .or(match sources {
            [only] => Some(only),
            _ => None,
        })
}

fn locate(
    source: Option<&ConfigSource>,
    section: Option<&str>,
    key: &str,
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let Some(source) = source else {
        return (None, None);
    };
    match key_offset(&source.content, section, key) {
        Some(at) => (
            Some(SourceSpan::new(at.into(), key.len())),
            Some(NamedSource::new(&source.name, source.content.clone())),
        ),
        None => (None, None),
    }
}

/// Byte offset of `key = …` inside `[section]`, or before the first header
/// when `section` is `None`.
fn key_offset(content: &str, section: Option<&str>, key: &str) -> Option<usize> {
    let mut current: Option<&str> = None;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            current = Some(header.trim());
        } else if current == section {
            let indent = line.len() - line.trim_start().len();
            if let Some(after) = line[indent..].strip_prefix(key) {
                if after.trim_start().starts_with('=') {
                    return Some(offset + indent);
                }
            }
        }
        offset += line.len();
    }
    None
}

/// The closest of `valid_keys` to `unknown`, if any is close enough.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Render errors with miette's graphical handler, without color.
pub fn render_to_string(errors: &[ConfigError]) -> String {
    let handler = GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor());
    let mut out = String::new();
    for error in errors {
        if handler.render_report(&mut out, error).is_err() {
            let _ = writeln!(out, "Error: {error}");
        }
    }
    out
}

pub fn render_errors(errors: &[ConfigError]) {
    eprint!("{}", render_to_string(errors));
}
