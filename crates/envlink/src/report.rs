// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global error reporter: fires the user callback at most once per cooldown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::ErrorContext;

/// User-supplied global error callback.
pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, ctx: ErrorContext) -> BoxFuture<'_, ()>;
}

struct FnHandler<F>(F);

impl<F, Fut> ErrorHandler for FnHandler<F>
where
    F: Fn(ErrorContext) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_error(&self, ctx: ErrorContext) -> BoxFuture<'_, ()> {
        Box::pin((self.0)(ctx))
    }
}

/// Wrap an async closure as an [`ErrorHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ErrorHandler>
where
    F: Fn(ErrorContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Debug, Default)]
struct ErrorGuard {
    has_fired: bool,
    cooldown_until: Option<Instant>,
}

/// Rate-limits a global error callback to one invocation per window.
///
/// Errors arriving inside an open window are dropped, not queued.
pub struct ErrorReporter {
    handler: Option<Arc<dyn ErrorHandler>>,
    cooldown: Duration,
    guard: Mutex<ErrorGuard>,
}

impl ErrorReporter {
    pub fn new(handler: Option<Arc<dyn ErrorHandler>>, cooldown: Duration) -> Self {
        Self { handler, cooldown, guard: Mutex::new(ErrorGuard::default()) }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Deliver `ctx` unless a report already fired inside the current window.
    ///
    /// Returns whether the handler was invoked.
    pub async fn report_once(&self, ctx: ErrorContext) -> bool {
        let Some(handler) = self.handler.as_ref() else {
            return false;
        };

        {
            let mut guard = self.guard.lock();
            let now = Instant::now();
            match guard.cooldown_until {
                Some(until) if now < until => {
                    tracing::debug!(kind = %ctx.kind, endpoint = %ctx.endpoint, "error report suppressed by cooldown");
                    return false;
                }
                Some(_) => *guard = ErrorGuard::default(),
                None => {}
            }
            if guard.has_fired {
                return false;
            }
            guard.has_fired = true;
            guard.cooldown_until = Some(now + self.cooldown);
        }

        tracing::debug!(kind = %ctx.kind, endpoint = %ctx.endpoint, status = ?ctx.status, "reporting error");
        handler.on_error(ctx).await;
        true
    }

    /// Clear fired state and cooldown unconditionally.
    pub fn reset_guard(&self) {
        *self.guard.lock() = ErrorGuard::default();
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
