// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token refresh: shared state for the single-flight coordinator and the
//! proactive scheduler, plus the seam that issues the refresh call.
//!
//! One [`TokenRefresher`] exists per client. It owns the in-flight refresh,
//! the armed timer and the scheduler's init flag, so independent clients in
//! the same process never share refresh state.

pub mod coordinator;
pub mod scheduler;

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use crate::config::Timings;
use crate::error::OperationError;
use crate::report::ErrorReporter;
use crate::token::{TokenPair, TokenStore};
use crate::wrap::Api;

pub use coordinator::Flight;
pub use scheduler::{plan_refresh, ArmedTimer, RefreshPlan};

/// Issues the network refresh call.
pub trait RefreshTransport: Send + Sync {
    /// Exchange `refresh_token` (sent as bearer credential) for a new pair.
    fn refresh<'a>(&'a self, refresh_token: &'a str)
        -> BoxFuture<'a, Result<TokenPair, OperationError>>;

    /// Endpoint reported in `REFRESH_FAILED` contexts.
    fn endpoint(&self) -> &str;

    /// HTTP method reported in `REFRESH_FAILED` contexts.
    fn method(&self) -> &str;
}

/// Refresh transport that calls a named operation on a handler.
pub struct ApiRefresher {
    api: Arc<dyn Api>,
    operation: String,
    tokens_pointer: String,
    endpoint: String,
    method: String,
}

impl ApiRefresher {
    /// Refresh through `operation` on `api`, reading the pair at `/data`.
    pub fn new(api: Arc<dyn Api>, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        let (endpoint, method) = match api.route(&operation) {
            Some(route) => (route.path, route.method),
            None => (operation.clone(), "POST".to_owned()),
        };
        Self { api, operation, tokens_pointer: "/data".to_owned(), endpoint, method }
    }

    /// Read the refreshed pair at a different JSON pointer.
    pub fn with_tokens_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.tokens_pointer = pointer.into();
        self
    }
}

impl RefreshTransport for ApiRefresher {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenPair, OperationError>> {
        Box::pin(async move {
            let args = vec![json!({
                "method": self.method,
                "headers": { "Authorization": format!("Bearer {refresh_token}") },
            })];
            let value = self.api.call(&self.operation, args).await?;
            TokenPair::from_json_at(&value, &self.tokens_pointer)
                .ok_or_else(|| OperationError::other("refresh response carried no token pair"))
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn method(&self) -> &str {
        &self.method
    }
}

/// Per-client refresh state shared by the coordinator and the scheduler.
pub struct TokenRefresher {
    tokens: Arc<dyn TokenStore>,
    transport: Arc<dyn RefreshTransport>,
    reporter: Arc<ErrorReporter>,
    timings: Timings,
    started_at: Instant,
    flight: Mutex<Option<Flight>>,
    flight_seq: AtomicU64,
    timer: Mutex<Option<ArmedTimer>>,
    initialized: AtomicBool,
    network_calls: AtomicU64,
}

impl TokenRefresher {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        transport: Arc<dyn RefreshTransport>,
        reporter: Arc<ErrorReporter>,
        timings: Timings,
    ) -> Arc<Self> {
        Arc::new(Self {
            tokens,
            transport,
            reporter,
            timings,
            started_at: Instant::now(),
            flight: Mutex::new(None),
            flight_seq: AtomicU64::new(0),
            timer: Mutex::new(None),
            initialized: AtomicBool::new(false),
            network_calls: AtomicU64::new(0),
        })
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }
}

/// Return current epoch seconds.
pub fn epoch_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or_default()
}
