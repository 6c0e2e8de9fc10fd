// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation wrapper: turns a handler's named operations into reactive,
//! retrying execution units.
//!
//! Members are classified by name into exactly one category:
//! constants pass through, chainable members return a re-wrapped handler,
//! raw members stay bound to the original handler, and everything else is
//! wrapped into [`ReactiveOperation`].

pub mod operation;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::OperationError;
use crate::http::Middleware;
use crate::refresh::TokenRefresher;
use crate::report::ErrorReporter;
use crate::token::TokenStore;

pub use operation::{inject_bearer, Observable, ReactiveOperation};

/// Positional arguments of a remote operation.
pub type Args = Vec<Value>;

/// Members whose invocation yields a new handler.
pub const CHAINABLE: [&str; 4] =
    ["withMiddleware", "withPreMiddleware", "withPostMiddleware", "clone"];

/// Generic low-level request member.
pub const RAW_REQUEST: &str = "request";

/// Suffix marking raw variants of standard operations.
pub const RAW_SUFFIX: &str = "Raw";

/// One member a handler exposes.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Constant { name: String, value: Value },
    Callable { name: String },
}

impl Member {
    pub fn constant(name: impl Into<String>, value: Value) -> Self {
        Self::Constant { name: name.into(), value }
    }

    pub fn callable(name: impl Into<String>) -> Self {
        Self::Callable { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Constant { name, .. } | Self::Callable { name } => name,
        }
    }
}

/// Method and path behind an operation, used in error contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: String,
    pub path: String,
}

/// A capability's set of named remote operations.
///
/// Object-safe for use as `Arc<dyn Api>`. Arity and return shape of each
/// operation are unknown to the wrapper.
pub trait Api: Send + Sync {
    /// Capability name this handler serves (e.g. `authentication`).
    fn capability(&self) -> &str;

    /// Every member, own members first, then inherited ones. Names may
    /// repeat across layers; the first occurrence wins.
    fn members(&self) -> Vec<Member>;

    /// Invoke a standard or raw operation.
    fn call<'a>(&'a self, name: &'a str, args: Args) -> BoxFuture<'a, Result<Value, OperationError>>;

    /// Invoke a chainable member, producing a new handler.
    fn chain(
        &self,
        name: &str,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> anyhow::Result<Arc<dyn Api>>;

    /// Route behind an operation, if known.
    fn route(&self, _name: &str) -> Option<Route> {
        None
    }
}

/// Category of a callable member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Returns a new handler that must itself be wrapped.
    Chainable,
    /// Low-level escape hatch exposed unwrapped.
    RawPassthrough,
    /// Wrapped into the reactive execute contract.
    Standard,
}

/// Classify a callable member by name.
pub fn classify(name: &str) -> OperationKind {
    if CHAINABLE.contains(&name) {
        OperationKind::Chainable
    } else if name == RAW_REQUEST || name.ends_with(RAW_SUFFIX) {
        OperationKind::RawPassthrough
    } else {
        OperationKind::Standard
    }
}

/// Declares which operation on which capability is the login call, and
/// where its response carries the token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginBinding {
    pub capability: String,
    pub operation: String,
    pub tokens_pointer: String,
}

impl Default for LoginBinding {
    fn default() -> Self {
        Self {
            capability: "authentication".to_owned(),
            operation: "login".to_owned(),
            tokens_pointer: "/data/tokens".to_owned(),
        }
    }
}

impl LoginBinding {
    pub fn matches(&self, capability: &str, operation: &str) -> bool {
        self.capability == capability && self.operation == operation
    }
}

/// Callback invoked when a refresh-and-retry cannot obtain a new token.
pub type RefreshFailedCallback = Arc<dyn Fn() + Send + Sync>;

/// Authentication hooks consumed by the wrapper.
#[derive(Clone)]
pub struct AuthConfig {
    pub tokens: Arc<dyn TokenStore>,
    pub on_refresh_failed: Option<RefreshFailedCallback>,
}

impl AuthConfig {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self { tokens, on_refresh_failed: None }
    }

    pub fn on_refresh_failed(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_refresh_failed = Some(Arc::new(callback));
        self
    }
}

/// Everything a wrapped handler shares with its operations and with
/// handlers derived from it through chainable members.
pub struct WrapContext {
    pub auth: Option<AuthConfig>,
    pub refresher: Option<Arc<TokenRefresher>>,
    pub reporter: Arc<ErrorReporter>,
    pub login: LoginBinding,
}

impl WrapContext {
    /// Context without authentication or refresh.
    pub fn anonymous(reporter: Arc<ErrorReporter>) -> Self {
        Self { auth: None, refresher: None, reporter, login: LoginBinding::default() }
    }
}

/// A handler with every member classified and wrapped.
pub struct ReactiveApi {
    handler: Arc<dyn Api>,
    ctx: Arc<WrapContext>,
    constants: IndexMap<String, Value>,
    callables: IndexMap<String, OperationKind>,
}

/// Wrap `handler`, enumerating its members once.
pub fn wrap(handler: Arc<dyn Api>, ctx: Arc<WrapContext>) -> ReactiveApi {
    let mut constants = IndexMap::new();
    let mut callables = IndexMap::new();
    for member in handler.members() {
        let name = member.name();
        if constants.contains_key(name) || callables.contains_key(name) {
            continue;
        }
        match member {
            Member::Constant { name, value } => {
                constants.insert(name, value);
            }
            Member::Callable { name } => {
                let kind = classify(&name);
                callables.insert(name, kind);
            }
        }
    }
    tracing::debug!(
        capability = handler.capability(),
        constants = constants.len(),
        callables = callables.len(),
        "wrapped handler"
    );
    ReactiveApi { handler, ctx, constants, callables }
}

impl ReactiveApi {
    pub fn capability(&self) -> &str {
        self.handler.capability()
    }

    /// Names of every member, constants first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constants.keys().chain(self.callables.keys()).map(String::as_str)
    }

    /// Category of a callable member.
    pub fn kind(&self, name: &str) -> Option<OperationKind> {
        self.callables.get(name).copied()
    }

    /// A non-callable member, copied through unchanged.
    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    /// Instantiate a standard operation with fresh reactive state.
    pub fn operation(&self, name: &str) -> anyhow::Result<ReactiveOperation> {
        self.expect_kind(name, OperationKind::Standard)?;
        Ok(ReactiveOperation::new(name, Arc::clone(&self.handler), Arc::clone(&self.ctx)))
    }

    /// Invoke a chainable member and wrap the handler it returns.
    pub fn chain(
        &self,
        name: &str,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> anyhow::Result<ReactiveApi> {
        self.expect_kind(name, OperationKind::Chainable)?;
        let next = self.handler.chain(name, middleware)?;
        Ok(wrap(next, Arc::clone(&self.ctx)))
    }

    /// A raw member, bound to the original handler.
    pub fn raw(&self, name: &str) -> anyhow::Result<RawOperation> {
        self.expect_kind(name, OperationKind::RawPassthrough)?;
        Ok(RawOperation { name: name.to_owned(), handler: Arc::clone(&self.handler) })
    }

    fn expect_kind(&self, name: &str, expected: OperationKind) -> anyhow::Result<()> {
        match self.callables.get(name) {
            Some(kind) if *kind == expected => Ok(()),
            Some(kind) => anyhow::bail!(
                "{}.{name} is {kind:?}, not {expected:?}",
                self.handler.capability()
            ),
            None => anyhow::bail!("unknown operation: {}.{name}", self.handler.capability()),
        }
    }
}

/// Unwrapped passthrough to a raw member: no state, no retry.
#[derive(Clone)]
pub struct RawOperation {
    name: String,
    handler: Arc<dyn Api>,
}

impl RawOperation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, args: Args) -> Result<Value, OperationError> {
        self.handler.call(&self.name, args).await
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
