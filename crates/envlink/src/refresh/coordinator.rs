// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight refresh coordinator.
//!
//! All concurrent callers share one in-flight refresh. After it settles the
//! result stays cached for the cooldown window, so a burst of triggers
//! (foreground retries, scheduler timer) costs at most one network call.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::error::{ErrorContext, ErrorKind};
use crate::refresh::TokenRefresher;
use crate::token::TokenPair;

/// An in-flight or recently settled refresh.
pub struct Flight {
    id: u64,
    result: Shared<BoxFuture<'static, Option<TokenPair>>>,
}

impl TokenRefresher {
    /// Obtain a fresh token pair, joining any refresh already in flight.
    ///
    /// Returns `None` when no refresh token is stored or the refresh call
    /// fails; both cases are reported as `REFRESH_FAILED`.
    pub async fn refresh(self: &Arc<Self>) -> Option<TokenPair> {
        let result = {
            let mut flight = self.flight.lock();
            match flight.as_ref() {
                Some(existing) => {
                    tracing::debug!(flight = existing.id, "joining refresh in flight");
                    existing.result.clone()
                }
                None => {
                    let id = self.flight_seq.fetch_add(1, Ordering::Relaxed) + 1;
                    let result = self.start_flight(id);
                    *flight = Some(Flight { id, result: result.clone() });
                    result
                }
            }
        };
        result.await
    }

    /// Whether a refresh is in flight or still cooling down.
    pub fn flight_active(&self) -> bool {
        self.flight.lock().is_some()
    }

    /// Number of refresh calls actually sent over the transport.
    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::Relaxed)
    }

    /// Run the refresh on its own task so it completes even if every
    /// awaiting caller is dropped.
    fn start_flight(self: &Arc<Self>, id: u64) -> Shared<BoxFuture<'static, Option<TokenPair>>> {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let refreshed = this.exchange().await;
            this.release_after_cooldown(id);
            if refreshed.is_some() {
                this.spawn_schedule();
            }
            refreshed
        });
        let joined: BoxFuture<'static, Option<TokenPair>> = Box::pin(async move {
            task.await.unwrap_or_else(|e| {
                tracing::warn!(err = %e, "refresh task failed");
                None
            })
        });
        joined.shared()
    }

    /// Clear the settled flight once the cooldown elapses, unless a newer
    /// flight has replaced it.
    fn release_after_cooldown(self: &Arc<Self>, id: u64) {
        let weak = Arc::downgrade(self);
        let cooldown = self.timings.refresh_cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            let mut flight = this.flight.lock();
            if flight.as_ref().is_some_and(|f| f.id == id) {
                *flight = None;
            }
        });
    }

    async fn exchange(&self) -> Option<TokenPair> {
        let current = self.tokens.get_tokens().await;
        let Some(refresh_token) = current.as_ref().and_then(TokenPair::refresh) else {
            tracing::warn!("no refresh token stored, cannot refresh");
            self.report_failure(Value::String("Missing refresh token".to_owned()), Some(401))
                .await;
            return None;
        };

        self.network_calls.fetch_add(1, Ordering::Relaxed);
        let mut refreshed = match self.transport.refresh(refresh_token).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(err = %e, "token refresh failed");
                self.report_failure(e.to_value(), e.status()).await;
                return None;
            }
        };

        // Keep the old refresh token when the server does not rotate it.
        if refreshed.refresh().is_none() {
            refreshed.refresh_token = refresh_token.to_owned();
        }
        if let (Some(old), Some(new)) =
            (current.as_ref().and_then(TokenPair::access_expiry), refreshed.access_expiry())
        {
            if new < old {
                tracing::warn!(old, new, "refreshed access token expires earlier than its predecessor");
            }
        }

        if let Err(e) = self.tokens.set_tokens(refreshed.clone()).await {
            tracing::warn!(err = %e, "failed to store refreshed tokens");
            self.report_failure(Value::String(format!("{e:#}")), None).await;
            return None;
        }
        tracing::info!(expires_at = ?refreshed.access_expiry(), "tokens refreshed");
        Some(refreshed)
    }

    async fn report_failure(&self, error: Value, status: Option<u16>) {
        let ctx = ErrorContext {
            kind: ErrorKind::RefreshFailed,
            error,
            status,
            endpoint: self.transport.endpoint().to_owned(),
            method: self.transport.method().to_owned(),
        };
        self.reporter.report_once(ctx).await;
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
