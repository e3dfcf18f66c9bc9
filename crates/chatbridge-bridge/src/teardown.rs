// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Step-by-step resource release with isolated failures.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use chatbridge_core::error::BridgeError;
use chatbridge_core::types::SessionId;

/// Outcome of a teardown. Every step is attempted regardless of earlier
/// failures; failures are collected here and logged, never propagated.
#[derive(Debug, Default)]
pub struct TeardownReport {
    completed: Vec<&'static str>,
    failures: Vec<BridgeError>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of one step.
    pub fn record(&mut self, step: &'static str, result: Result<(), BridgeError>) {
        match result {
            Ok(()) => self.completed.push(step),
            Err(e) => self.failures.push(BridgeError::Teardown {
                step,
                message: e.to_string(),
            }),
        }
    }

    /// Run `step` with a time bound and record its result.
    pub async fn run<F>(&mut self, step: &'static str, limit: Duration, fut: F)
    where
        F: Future<Output = Result<(), BridgeError>>,
    {
        let result = match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout { duration: limit }),
        };
        self.record(step, result);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn completed(&self) -> &[&'static str] {
        &self.completed
    }

    pub fn failures(&self) -> &[BridgeError] {
        &self.failures
    }

    /// Log the report for `session_id`.
    pub fn log(&self, session_id: &SessionId) {
        if self.is_clean() {
            debug!(session_id = %session_id, steps = ?self.completed, "teardown complete");
            return;
        }
        for failure in &self.failures {
            warn!(session_id = %session_id, error = %failure, "teardown step failed");
        }
    }
}
