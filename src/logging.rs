// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Subscriber setup for applications embedding the client.
//!
//! The library itself only emits `tracing` events. Applications that do not
//! bring their own subscriber can install one here:
//!
//! ```no_run
//! use krypton_client::logging::{init_tracing, LogConfig, LogLevel};
//!
//! init_tracing(&LogConfig::default().with_level(LogLevel::Debug)).ok();
//! ```
//!
//! `RUST_LOG` overrides the configured level when set.

use std::fmt;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::{KryptonError, Result};

/// Verbosity threshold for emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Everything, including retry decisions.
    Trace,
    /// Request lines and poll progress.
    Debug,
    /// Enrollment and login milestones.
    #[default]
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// Upper-case level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = KryptonError;

    fn from_str(value: &str) -> Result<Self> {
        let level = match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            other => {
                return Err(KryptonError::configuration(format!(
                    "unknown log level: {other}"
                )))
            }
        };
        Ok(level)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Subscriber options.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Default threshold when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Emit one JSON object per event.
    pub json_format: bool,
    /// Include the event target (module path).
    pub include_target: bool,
}

impl LogConfig {
    /// Change the default threshold.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Switch to JSON output.
    pub fn with_json(mut self) -> Self {
        self.json_format = true;
        self
    }

    /// Include event targets.
    pub fn with_target(mut self) -> Self {
        self.include_target = true;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.level).into())
            .from_env_lossy()
    }
}

/// Install a global `fmt` subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(config.include_target)
        .with_writer(std::io::stderr);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| KryptonError::configuration(format!("failed to initialize logging: {e}")))
}
