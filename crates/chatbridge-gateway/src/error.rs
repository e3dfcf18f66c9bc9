// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway error types.

/// Failures running the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to bind gateway to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gateway server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Failures talking to the media upload API.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("media upload request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("media API answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("media API response carried no file id")]
    MissingId,

    #[error("invalid content type `{0}`")]
    ContentType(String),
}
