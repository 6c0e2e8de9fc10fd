// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reactive execution unit for one standard operation.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::error::{normalize, ErrorContext, ErrorKind, NormalizedError, OperationError};
use crate::token::TokenPair;
use crate::wrap::{Api, Args, WrapContext};

/// A value observers can poll or subscribe to.
#[derive(Debug, Clone)]
pub struct Observable<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T: Clone> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// Resets a flag when dropped, so it clears on every exit path.
struct ClearOnDrop<'a>(&'a Observable<bool>);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// One instantiation of a standard operation with its own observable state.
///
/// Instances never share state; two call sites executing the same
/// operation each observe only their own `pending`/`error`/`response`.
pub struct ReactiveOperation {
    name: String,
    handler: Arc<dyn Api>,
    ctx: Arc<WrapContext>,
    pending: Observable<bool>,
    error: Observable<Option<NormalizedError>>,
    response: Observable<Option<Value>>,
    is_retrying: Observable<bool>,
}

impl ReactiveOperation {
    pub(crate) fn new(name: &str, handler: Arc<dyn Api>, ctx: Arc<WrapContext>) -> Self {
        Self {
            name: name.to_owned(),
            handler,
            ctx,
            pending: Observable::new(false),
            error: Observable::new(None),
            response: Observable::new(None),
            is_retrying: Observable::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pending(&self) -> &Observable<bool> {
        &self.pending
    }

    pub fn error(&self) -> &Observable<Option<NormalizedError>> {
        &self.error
    }

    pub fn response(&self) -> &Observable<Option<Value>> {
        &self.response
    }

    pub fn is_retrying(&self) -> &Observable<bool> {
        &self.is_retrying
    }

    /// Run the operation with `args`.
    ///
    /// Returns the result on success. On failure returns `None` and leaves
    /// the normalized failure in [`error`](Self::error). An expired
    /// credential triggers at most one refresh followed by one retry,
    /// except on the login operation itself.
    pub async fn execute(&self, args: Args) -> Option<Value> {
        self.pending.set(true);
        self.error.set(None);
        self.response.set(None);
        let _pending = ClearOnDrop(&self.pending);

        let first = match self.attempt(args.clone(), None).await {
            Ok(value) => return Some(self.succeed(value).await),
            Err(e) => e,
        };

        let refreshable = first.is_credential_expired() && !self.is_login();
        let (auth, refresher) = match (&self.ctx.auth, &self.ctx.refresher) {
            (Some(auth), Some(refresher)) if refreshable => (auth, refresher),
            _ => {
                self.fail(&first, &args).await;
                return None;
            }
        };

        tracing::debug!(operation = %self.name, "credential expired, refreshing before retry");
        self.is_retrying.set(true);
        let _retrying = ClearOnDrop(&self.is_retrying);

        let Some(refreshed) = refresher.refresh().await else {
            tracing::warn!(operation = %self.name, "refresh failed, giving up on operation");
            self.error.set(Some(self.normalize(&first, &args)));
            if let Some(callback) = auth.on_refresh_failed.as_ref() {
                callback();
            }
            return None;
        };

        let token = auth
            .tokens
            .get_tokens()
            .await
            .and_then(|t| t.access().map(str::to_owned))
            .or_else(|| refreshed.access().map(str::to_owned));
        match self.attempt(args.clone(), token.as_deref()).await {
            Ok(value) => Some(self.succeed(value).await),
            Err(e) => {
                self.fail(&e, &args).await;
                None
            }
        }
    }

    async fn attempt(&self, mut args: Args, bearer: Option<&str>) -> Result<Value, OperationError> {
        if let Some(token) = bearer {
            inject_bearer(&mut args, token);
        }
        self.handler.call(&self.name, args).await
    }

    fn is_login(&self) -> bool {
        self.ctx.login.matches(self.handler.capability(), &self.name)
    }

    async fn succeed(&self, value: Value) -> Value {
        if self.is_login() {
            self.capture_login(&value).await;
        }
        self.response.set(Some(value.clone()));
        value
    }

    /// Persist tokens from a login response and arm the scheduler.
    async fn capture_login(&self, value: &Value) {
        let Some(auth) = self.ctx.auth.as_ref() else {
            return;
        };
        let Some(tokens) = TokenPair::from_json_at(value, &self.ctx.login.tokens_pointer) else {
            tracing::warn!(
                pointer = %self.ctx.login.tokens_pointer,
                "login response carried no token pair"
            );
            return;
        };
        if let Err(e) = auth.tokens.set_tokens(tokens).await {
            tracing::warn!(err = %e, "failed to store login tokens");
            return;
        }
        tracing::info!("login tokens stored");
        if let Some(refresher) = self.ctx.refresher.as_ref() {
            refresher.schedule_next().await;
        }
    }

    async fn fail(&self, raw: &OperationError, args: &Args) {
        let normalized = self.normalize(raw, args);
        let ctx = ErrorContext {
            kind: ErrorKind::for_status(normalized.status),
            error: serde_json::to_value(&normalized).unwrap_or_else(|_| raw.to_value()),
            status: Some(normalized.status),
            endpoint: self.endpoint(),
            method: self.method(args),
        };
        tracing::debug!(operation = %self.name, status = normalized.status, "operation failed");
        self.error.set(Some(normalized));
        self.ctx.reporter.report_once(ctx).await;
    }

    fn normalize(&self, raw: &OperationError, args: &Args) -> NormalizedError {
        normalize(raw, &self.endpoint(), &self.method(args))
    }

    fn endpoint(&self) -> String {
        match self.handler.route(&self.name) {
            Some(route) => route.path,
            None => self.name.clone(),
        }
    }

    fn method(&self, args: &Args) -> String {
        if let Some(route) = self.handler.route(&self.name) {
            return route.method;
        }
        args.first()
            .and_then(|a| a.get("method"))
            .and_then(Value::as_str)
            .map(str::to_uppercase)
            .unwrap_or_else(|| "GET".to_owned())
    }
}

/// Merge `Authorization: Bearer <token>` into the `headers` of the first
/// argument when it is an object. Other arguments are left untouched.
pub fn inject_bearer(args: &mut Args, token: &str) {
    let Some(Value::Object(first)) = args.first_mut() else {
        return;
    };
    let headers = first.entry("headers").or_insert_with(|| Value::Object(Map::new()));
    if !headers.is_object() {
        *headers = Value::Object(Map::new());
    }
    if let Value::Object(headers) = headers {
        headers.retain(|name, _| !name.eq_ignore_ascii_case("authorization"));
        headers.insert("Authorization".to_owned(), Value::String(format!("Bearer {token}")));
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
