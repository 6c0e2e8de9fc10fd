// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive refresh scheduling ahead of access-token expiry.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Timings;
use crate::refresh::{epoch_secs, TokenRefresher};
use crate::token::TokenPair;

/// What the scheduler decided for the current token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    /// Missing tokens or undecodable expiry; nothing armed.
    Idle,
    /// Due now, but inside the startup grace window.
    Suppressed,
    /// Due now; refresh immediately.
    Immediate,
    /// Arm a one-shot timer for this delay.
    After(Duration),
}

/// Decide when to refresh a token expiring at `exp` (epoch seconds).
pub fn plan_refresh(exp: i64, now: i64, since_start: Duration, timings: &Timings) -> RefreshPlan {
    let fire_at = exp.saturating_sub(timings.refresh_lead.as_secs() as i64);
    let delay_ms = fire_at.saturating_sub(now).saturating_mul(1000);
    if delay_ms <= timings.immediate_threshold.as_millis() as i64 {
        if since_start < timings.startup_grace {
            return RefreshPlan::Suppressed;
        }
        return RefreshPlan::Immediate;
    }
    RefreshPlan::After(Duration::from_millis(delay_ms as u64))
}

/// A one-shot refresh timer. Replacing it aborts the previous task.
pub struct ArmedTimer {
    fires_at: Instant,
    handle: JoinHandle<()>,
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TokenRefresher {
    /// Cancel any armed timer and plan the next refresh from the stored pair.
    pub async fn schedule_next(self: &Arc<Self>) -> RefreshPlan {
        self.cancel_timer();

        let Some(tokens) = self.tokens.get_tokens().await.filter(TokenPair::is_complete) else {
            return RefreshPlan::Idle;
        };
        let Some(exp) = tokens.access_expiry() else {
            tracing::debug!("access token expiry not decodable, not scheduling");
            return RefreshPlan::Idle;
        };

        let plan = plan_refresh(exp, epoch_secs(), self.started_at.elapsed(), &self.timings);
        match plan {
            RefreshPlan::Idle => {}
            RefreshPlan::Suppressed => {
                tracing::debug!(exp, "token near expiry during startup grace, deferring refresh");
            }
            RefreshPlan::Immediate => {
                tracing::debug!(exp, "token due for refresh now");
                self.refresh().await;
            }
            RefreshPlan::After(delay) => self.arm(delay),
        }
        plan
    }

    /// Arm the first schedule once per refresher, when both tokens exist.
    ///
    /// Returns whether this call performed the initialization.
    pub async fn init_if_needed(self: &Arc<Self>) -> bool {
        if self.initialized.load(Ordering::Acquire) {
            return false;
        }
        let complete = self.tokens.get_tokens().await.is_some_and(|t| t.is_complete());
        if !complete {
            return false;
        }
        if self.initialized.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.schedule_next().await;
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Time left until the armed timer fires, if one is armed.
    pub fn armed_delay(&self) -> Option<Duration> {
        let timer = self.timer.lock();
        let timer = timer.as_ref().filter(|t| !t.handle.is_finished())?;
        Some(timer.fires_at.saturating_duration_since(Instant::now()))
    }

    pub fn is_armed(&self) -> bool {
        self.armed_delay().is_some()
    }

    pub fn cancel_timer(&self) {
        self.timer.lock().take();
    }

    /// Re-arm from a detached task (used after a refresh settles).
    pub(crate) fn spawn_schedule(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.schedule_next().await;
        });
    }

    /// The timer task only holds a weak reference, so dropping the last
    /// client handle drops the refresher and aborts the timer with it.
    fn arm(self: &Arc<Self>, delay: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            this.refresh().await;
        });
        tracing::debug!(delay_secs = delay.as_secs(), "refresh timer armed");
        let previous = self.timer.lock().replace(ArmedTimer { fires_at: Instant::now() + delay, handle });
        drop(previous);
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
