// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Timing knobs for refresh scheduling and error rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Refresh this long before the access token expires.
    pub refresh_lead: Duration,
    /// Delays at or below this are treated as due now.
    pub immediate_threshold: Duration,
    /// Due-now refreshes are suppressed this long after startup.
    pub startup_grace: Duration,
    /// A settled refresh is reused by callers for this long.
    pub refresh_cooldown: Duration,
    /// Minimum spacing between global error callback invocations.
    pub error_cooldown: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            refresh_lead: Duration::from_secs(60),
            immediate_threshold: Duration::from_millis(5000),
            startup_grace: Duration::from_millis(10_000),
            refresh_cooldown: Duration::from_millis(3000),
            error_cooldown: Duration::from_millis(3000),
        }
    }
}

/// Configuration for the envlink command-line client.
#[derive(Debug, Clone, Parser)]
#[command(name = "envlink", version, about = "Token-managing client for the envlink API")]
pub struct Config {
    /// Base URL of the API server.
    #[arg(long, default_value = "http://127.0.0.1:3000", env = "ENVLINK_BASE_URL")]
    pub base_url: String,

    /// Directory holding persisted tokens. Resolved from the environment if unset.
    #[arg(long, env = "ENVLINK_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Static bearer token. Disables the token store and refresh.
    #[arg(long, env = "ENVLINK_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "ENVLINK_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "ENVLINK_LOG_FORMAT")]
    pub log_format: String,

    /// Log level filter.
    #[arg(long, default_value = "info", env = "ENVLINK_LOG_LEVEL")]
    pub log_level: String,

    /// Seconds before expiry at which tokens are refreshed.
    #[arg(long, default_value_t = 60, env = "ENVLINK_REFRESH_LEAD_SECS")]
    pub refresh_lead_secs: u64,

    /// Refresh delays at or below this many milliseconds fire immediately.
    #[arg(long, default_value_t = 5000, env = "ENVLINK_IMMEDIATE_THRESHOLD_MS")]
    pub immediate_threshold_ms: u64,

    /// Startup window in milliseconds during which immediate refreshes are skipped.
    #[arg(long, default_value_t = 10_000, env = "ENVLINK_STARTUP_GRACE_MS")]
    pub startup_grace_ms: u64,

    /// Milliseconds a settled refresh is shared with later callers.
    #[arg(long, default_value_t = 3000, env = "ENVLINK_REFRESH_COOLDOWN_MS")]
    pub refresh_cooldown_ms: u64,

    /// Minimum milliseconds between error callback invocations.
    #[arg(long, default_value_t = 3000, env = "ENVLINK_ERROR_COOLDOWN_MS")]
    pub error_cooldown_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Log in and persist the issued tokens.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ENVLINK_PASSWORD")]
        password: String,
    },
    /// Execute one operation and print its result.
    Call {
        capability: String,
        operation: String,
        /// Positional arguments, each a JSON value.
        #[arg(long = "args", num_args = 1..)]
        args: Vec<String>,
        /// Bypass the reactive wrapper and print the raw response envelope.
        #[arg(long)]
        raw: bool,
    },
    /// Print the stored token pair and its decoded expiry.
    Tokens,
    /// Forget the stored token pair.
    Logout,
    /// Keep tokens fresh until interrupted.
    Watch,
}

impl Config {
    pub fn timings(&self) -> Timings {
        Timings {
            refresh_lead: Duration::from_secs(self.refresh_lead_secs),
            immediate_threshold: Duration::from_millis(self.immediate_threshold_ms),
            startup_grace: Duration::from_millis(self.startup_grace_ms),
            refresh_cooldown: Duration::from_millis(self.refresh_cooldown_ms),
            error_cooldown: Duration::from_millis(self.error_cooldown_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// State directory, falling back to the environment-derived default.
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(crate::token::state_dir)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {} (expected json or text)", self.log_format);
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("--timeout-ms must be greater than zero");
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("--base-url must be an http(s) URL: {}", self.base_url);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
