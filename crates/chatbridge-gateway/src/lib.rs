// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request layer in front of the chatbridge [`Bridge`].
//!
//! Callers send messages, poll for replies and release sessions over plain
//! JSON endpoints; image uploads are forwarded to a media API whose file id
//! the caller then sends as the message `url`.
//!
//! [`Bridge`]: chatbridge_bridge::Bridge

pub mod error;
pub mod handlers;
pub mod media;
pub mod server;

pub use error::{GatewayError, MediaError};
pub use media::MediaClient;
pub use server::{GatewayState, ServerConfig, router, start_server};
