// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response hooks applied by [`HttpApi`](super::HttpApi).

use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use reqwest::Method;
use serde_json::Value;

/// Outgoing request, mutable by pre hooks.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub operation: String,
    pub method: Method,
    pub url: reqwest::Url,
    pub headers: IndexMap<String, String>,
    pub body: Option<Value>,
}

/// Received response, observed by post hooks.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub operation: String,
    pub method: Method,
    pub url: reqwest::Url,
    pub status: u16,
    pub body: Value,
}

/// Hooks around every request a handler sends. Both default to no-ops.
pub trait Middleware: Send + Sync {
    fn pre<'a>(&'a self, _req: &'a mut RequestContext) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn post<'a>(&'a self, _resp: &'a ResponseContext) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Restricts a middleware to its pre hook.
pub struct PreOnly(pub Arc<dyn Middleware>);

impl Middleware for PreOnly {
    fn pre<'a>(&'a self, req: &'a mut RequestContext) -> BoxFuture<'a, ()> {
        self.0.pre(req)
    }
}

/// Restricts a middleware to its post hook.
pub struct PostOnly(pub Arc<dyn Middleware>);

impl Middleware for PostOnly {
    fn post<'a>(&'a self, resp: &'a ResponseContext) -> BoxFuture<'a, ()> {
        self.0.post(resp)
    }
}

/// Logs client-error envelopes returned by the server.
pub struct LogClientErrors;

impl Middleware for LogClientErrors {
    fn post<'a>(&'a self, resp: &'a ResponseContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if (400..500).contains(&resp.status) {
                let message = resp.body.get("message").and_then(Value::as_str).unwrap_or("");
                tracing::warn!(
                    operation = %resp.operation,
                    status = resp.status,
                    url = %resp.url,
                    message,
                    "client error response"
                );
            }
        })
    }
}
