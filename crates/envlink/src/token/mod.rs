// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token pair ownership: the store seam, an in-memory store, and the
//! on-disk variant in [`persist`].
//!
//! The store is the only shared mutable resource in the client. Wrapped
//! operations and the scheduler read through it; only the refresh
//! coordinator and the login interception path write to it.

pub mod expiry;
pub mod persist;

use std::path::PathBuf;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Access/refresh token pair as issued by the authentication capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
    }

    /// Access token, if non-empty.
    pub fn access(&self) -> Option<&str> {
        Some(self.access_token.as_str()).filter(|t| !t.is_empty())
    }

    /// Refresh token, if non-empty.
    pub fn refresh(&self) -> Option<&str> {
        Some(self.refresh_token.as_str()).filter(|t| !t.is_empty())
    }

    /// Both halves present.
    pub fn is_complete(&self) -> bool {
        self.access().is_some() && self.refresh().is_some()
    }

    /// Decoded `exp` claim of the access token.
    pub fn access_expiry(&self) -> Option<i64> {
        self.access().and_then(expiry::decode_expiry)
    }

    /// Extract a pair from a response payload at a JSON pointer
    /// (e.g. `/data/tokens`). Requires a non-empty access token.
    pub fn from_json_at(value: &serde_json::Value, pointer: &str) -> Option<Self> {
        let pair: Self = serde_json::from_value(value.pointer(pointer)?.clone()).ok()?;
        pair.access().is_some().then_some(pair)
    }
}

/// Holder of the current token pair.
///
/// Object-safe for use as `Arc<dyn TokenStore>`. Implementations may be
/// purely in-memory or back onto persistent storage.
pub trait TokenStore: Send + Sync {
    fn get_tokens(&self) -> BoxFuture<'_, Option<TokenPair>>;

    fn set_tokens(&self, tokens: TokenPair) -> BoxFuture<'_, anyhow::Result<()>>;
}

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new(initial: Option<TokenPair>) -> Self {
        Self { tokens: RwLock::new(initial) }
    }

    /// Synchronous snapshot, for callers outside an async context.
    pub fn snapshot(&self) -> Option<TokenPair> {
        self.tokens.read().clone()
    }

    pub fn clear(&self) {
        *self.tokens.write() = None;
    }
}

impl TokenStore for MemoryTokenStore {
    fn get_tokens(&self) -> BoxFuture<'_, Option<TokenPair>> {
        let tokens = self.snapshot();
        Box::pin(async move { tokens })
    }

    fn set_tokens(&self, tokens: TokenPair) -> BoxFuture<'_, anyhow::Result<()>> {
        *self.tokens.write() = Some(tokens);
        Box::pin(async { Ok(()) })
    }
}

/// Resolve the state directory for persisted client data.
///
/// Checks `ENVLINK_STATE_DIR`, then `$XDG_STATE_HOME/envlink`,
/// then `$HOME/.local/state/envlink`.
pub fn state_dir() -> PathBuf {
    state_dir_with(|name| std::env::var(name).ok())
}

/// [`state_dir`] with an injectable environment lookup.
pub fn state_dir_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = env("ENVLINK_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = env("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("envlink");
    }
    if let Some(home) = env("HOME") {
        return PathBuf::from(home).join(".local/state/envlink");
    }
    PathBuf::from(".envlink")
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
