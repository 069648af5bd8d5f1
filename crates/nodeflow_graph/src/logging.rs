// SPDX-License-Identifier: MIT OR Apache-2.0
//! Logger capability handed to nodes while they run.

use serde::{Deserialize, Serialize};

/// Severity of a node-produced message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Informational
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Sink for messages emitted by nodes, tagged with the emitting source
pub trait GraphLogger {
    /// Record a message
    fn log(&self, level: LogLevel, source: &str, message: &str);

    /// Record an informational message
    fn info(&self, source: &str, message: &str) {
        self.log(LogLevel::Info, source, message);
    }

    /// Record a warning
    fn warn(&self, source: &str, message: &str) {
        self.log(LogLevel::Warn, source, message);
    }

    /// Record an error
    fn error(&self, source: &str, message: &str) {
        self.log(LogLevel::Error, source, message);
    }
}

/// Forwards messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl GraphLogger for TracingLogger {
    fn log(&self, level: LogLevel, source: &str, message: &str) {
        match level {
            LogLevel::Info => tracing::info!(source, "{message}"),
            LogLevel::Warn => tracing::warn!(source, "{message}"),
            LogLevel::Error => tracing::error!(source, "{message}"),
        }
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl GraphLogger for NullLogger {
    fn log(&self, _level: LogLevel, _source: &str, _message: &str) {}
}
