// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: mock handlers, mock refresh transport,
//! recording error handler, log capture, token builders, and assertion
//! helpers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::{ErrorContext, OperationError};
use crate::http::Middleware;
use crate::refresh::RefreshTransport;
use crate::report::ErrorHandler;
use crate::token::TokenPair;
use crate::wrap::{Api, Args, Member, Route};

/// Build an unsigned compact token whose payload carries `exp`.
pub fn jwt_with_exp(exp: i64) -> String {
    jwt_with_payload(&json!({ "sub": "user-1", "exp": exp }).to_string())
}

/// Build an unsigned compact token with a raw payload string.
pub fn jwt_with_payload(payload: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload);
    format!("{header}.{body}.signature")
}

/// Token pair whose access token expires at `exp`.
pub fn pair_expiring_at(exp: i64, refresh: &str) -> TokenPair {
    TokenPair::new(jwt_with_exp(exp), refresh)
}

/// Failure a server returns for an expired access token.
pub fn token_expired() -> OperationError {
    OperationError::Response {
        status: 401,
        body: json!({ "success": false, "status": 401, "message": "Token expired" })
            .to_string()
            .into(),
    }
}

/// Failure with an arbitrary status and message envelope.
pub fn response_error(status: u16, message: &str) -> OperationError {
    OperationError::Response {
        status,
        body: json!({ "success": false, "status": status, "message": message }).to_string().into(),
    }
}

/// One recorded invocation on a [`MockApi`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: String,
    pub args: Args,
}

#[derive(Default)]
struct MockState {
    scripted: Mutex<HashMap<String, VecDeque<Result<Value, OperationError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
    chains: Mutex<Vec<(String, usize)>>,
}

/// Scriptable handler. Unscripted calls succeed with `null`.
///
/// Handlers derived through chainable members share the script and the
/// call log with their parent.
#[derive(Clone)]
pub struct MockApi {
    capability: String,
    members: Vec<Member>,
    routes: HashMap<String, Route>,
    delay: Option<Duration>,
    generation: u32,
    state: Arc<MockState>,
}

impl MockApi {
    pub fn new(capability: &str) -> Self {
        Self {
            capability: capability.to_owned(),
            members: Vec::new(),
            routes: HashMap::new(),
            delay: None,
            generation: 0,
            state: Arc::new(MockState::default()),
        }
    }

    /// Add callable members in declaration order.
    pub fn operations(mut self, names: &[&str]) -> Self {
        self.members.extend(names.iter().map(|n| Member::callable(*n)));
        self
    }

    pub fn constant(mut self, name: &str, value: Value) -> Self {
        self.members.push(Member::constant(name, value));
        self
    }

    pub fn route(mut self, name: &str, method: &str, path: &str) -> Self {
        self.routes
            .insert(name.to_owned(), Route { method: method.to_owned(), path: path.to_owned() });
        self
    }

    /// Delay every call, to keep operations observably in flight.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue the next result for `operation`.
    pub fn respond(&self, operation: &str, result: Result<Value, OperationError>) {
        self.state.scripted.lock().entry(operation.to_owned()).or_default().push_back(result);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().clone()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.operation == operation).collect()
    }

    /// Chainable members invoked so far, with their middleware counts.
    pub fn chains(&self) -> Vec<(String, usize)> {
        self.state.chains.lock().clone()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn into_api(self) -> Arc<dyn Api> {
        Arc::new(self)
    }
}

impl Api for MockApi {
    fn capability(&self) -> &str {
        &self.capability
    }

    fn members(&self) -> Vec<Member> {
        self.members.clone()
    }

    fn call<'a>(&'a self, name: &'a str, args: Args) -> BoxFuture<'a, Result<Value, OperationError>> {
        Box::pin(async move {
            self.state.calls.lock().push(RecordedCall { operation: name.to_owned(), args });
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.state.scripted.lock().get_mut(name).and_then(VecDeque::pop_front);
            next.unwrap_or(Ok(Value::Null))
        })
    }

    fn chain(
        &self,
        name: &str,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> anyhow::Result<Arc<dyn Api>> {
        self.state.chains.lock().push((name.to_owned(), middleware.len()));
        let mut next = self.clone();
        next.generation += 1;
        Ok(Arc::new(next))
    }

    fn route(&self, name: &str) -> Option<Route> {
        self.routes.get(name).cloned()
    }
}

/// Refresh transport returning a fixed result after an optional delay.
pub struct MockRefresher {
    result: Mutex<Result<TokenPair, OperationError>>,
    delay: Duration,
    calls: AtomicU32,
    seen: Mutex<Vec<String>>,
}

impl MockRefresher {
    pub fn returning(pair: TokenPair) -> Arc<Self> {
        Self::with_result(Ok(pair), Duration::ZERO)
    }

    pub fn failing(error: OperationError) -> Arc<Self> {
        Self::with_result(Err(error), Duration::ZERO)
    }

    pub fn with_result(result: Result<TokenPair, OperationError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(result),
            delay,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn set_result(&self, result: Result<TokenPair, OperationError>) {
        *self.result.lock() = result;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl RefreshTransport for MockRefresher {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenPair, OperationError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(refresh_token.to_owned());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.lock().clone()
        })
    }

    fn endpoint(&self) -> &str {
        "/api/v1/auth/refresh"
    }

    fn method(&self) -> &str {
        "POST"
    }
}

/// Error handler that records every context it receives.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    contexts: Arc<Mutex<Vec<ErrorContext>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> Arc<dyn ErrorHandler> {
        Arc::new(self.clone())
    }

    pub fn count(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn contexts(&self) -> Vec<ErrorContext> {
        self.contexts.lock().clone()
    }
}

impl ErrorHandler for RecordingHandler {
    fn on_error(&self, ctx: ErrorContext) -> BoxFuture<'_, ()> {
        self.contexts.lock().push(ctx);
        Box::pin(async {})
    }
}

/// Assert that an expression evaluates to `Err` whose message contains a substring.
/// Captures formatted log output for the current thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events on this thread into the buffer until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
