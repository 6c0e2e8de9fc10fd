// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`Api`] implementation issuing one HTTP request per operation.
//!
//! The first argument, when an object, carries `params` (path template
//! values), `query`, `body` and `headers`. The generic `request` member
//! takes `method` and `path` in the same object instead of a named route.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use reqwest::Method;
use serde_json::{json, Map, Value};

use crate::error::OperationError;
use crate::http::{Configuration, Middleware, PostOnly, PreOnly, RequestContext, ResponseContext};
use crate::wrap::{Api, Args, Member, Route, CHAINABLE, RAW_REQUEST, RAW_SUFFIX};

/// One named route of a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSpec {
    pub name: String,
    pub method: Method,
    pub path: String,
}

impl OperationSpec {
    pub fn new(name: &str, method: Method, path: &str) -> Self {
        Self { name: name.to_owned(), method, path: path.to_owned() }
    }

    pub fn get(name: &str, path: &str) -> Self {
        Self::new(name, Method::GET, path)
    }

    pub fn post(name: &str, path: &str) -> Self {
        Self::new(name, Method::POST, path)
    }

    pub fn put(name: &str, path: &str) -> Self {
        Self::new(name, Method::PUT, path)
    }

    pub fn patch(name: &str, path: &str) -> Self {
        Self::new(name, Method::PATCH, path)
    }

    pub fn delete(name: &str, path: &str) -> Self {
        Self::new(name, Method::DELETE, path)
    }
}

/// A capability served over HTTP.
#[derive(Clone)]
pub struct HttpApi {
    capability: String,
    config: Configuration,
    operations: Arc<IndexMap<String, OperationSpec>>,
}

/// Parsed request before middleware runs.
struct Outgoing {
    method: Method,
    path: String,
    params: Map<String, Value>,
    query: Vec<(String, String)>,
    body: Option<Value>,
    headers: IndexMap<String, String>,
}

impl HttpApi {
    pub fn new(capability: &str, config: Configuration, operations: Vec<OperationSpec>) -> Self {
        let operations = operations.into_iter().map(|op| (op.name.clone(), op)).collect();
        Self { capability: capability.to_owned(), config, operations: Arc::new(operations) }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    fn with_config(&self, config: Configuration) -> Self {
        Self { capability: self.capability.clone(), config, operations: Arc::clone(&self.operations) }
    }

    /// Resolve a standard or raw member to its route.
    fn spec(&self, name: &str) -> Option<&OperationSpec> {
        self.operations
            .get(name)
            .or_else(|| name.strip_suffix(RAW_SUFFIX).and_then(|base| self.operations.get(base)))
    }

    async fn send(&self, operation: &str, out: Outgoing) -> Result<Envelope, OperationError> {
        let url = self.url(&out.path, &out.params)?;
        let mut req = RequestContext {
            operation: operation.to_owned(),
            method: out.method,
            url,
            headers: out.headers,
            body: out.body,
        };
        if !req.headers.keys().any(|k| k.eq_ignore_ascii_case("authorization")) {
            if let Some(token) = self.config.access_token.resolve().await {
                req.headers.insert("Authorization".to_owned(), format!("Bearer {token}"));
            }
        }
        for mw in &self.config.middleware {
            mw.pre(&mut req).await;
        }

        tracing::debug!(operation, method = %req.method, url = %req.url, "sending request");
        let mut builder = self.config.client.request(req.method.clone(), req.url.clone());
        if !out.query.is_empty() {
            builder = builder.query(&out.query);
        }
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(send_error)?;
        let status = resp.status().as_u16();
        let headers: Map<String, Value> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_owned(), Value::String(v.to_str().ok()?.to_owned()))))
            .collect();
        let bytes = resp.bytes().await.map_err(|e| {
            tracing::debug!(operation, status, err = %e, "response body unreadable");
            OperationError::Other {
                status: Some(status),
                message: format!("failed to read response body: {e}"),
                error: None,
            }
        })?;
        let body = parse_body(&bytes);

        let observed = ResponseContext {
            operation: operation.to_owned(),
            method: req.method,
            url: req.url,
            status,
            body: body.clone(),
        };
        for mw in &self.config.middleware {
            mw.post(&observed).await;
        }

        if !(200..300).contains(&status) {
            tracing::debug!(operation, status, "request failed");
            return Err(OperationError::Response { status, body: bytes });
        }
        Ok(Envelope { status, headers, body })
    }

    fn url(&self, template: &str, params: &Map<String, Value>) -> Result<reqwest::Url, OperationError> {
        let mut url = reqwest::Url::parse(&self.config.base_path)
            .map_err(|e| OperationError::other(format!("invalid base path: {e}")))?;
        let mut segments = Vec::new();
        for segment in template.split('/').filter(|s| !s.is_empty()) {
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => segments.push(param(params, name)?),
                None => segments.push(segment.to_owned()),
            }
        }
        url.path_segments_mut()
            .map_err(|_| OperationError::other("base path cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

struct Envelope {
    status: u16,
    headers: Map<String, Value>,
    body: Value,
}

impl Envelope {
    fn into_value(self) -> Value {
        json!({ "status": self.status, "headers": self.headers, "body": self.body })
    }
}

impl Api for HttpApi {
    fn capability(&self) -> &str {
        &self.capability
    }

    fn members(&self) -> Vec<Member> {
        let mut members = Vec::with_capacity(self.operations.len() * 2 + CHAINABLE.len() + 2);
        for name in self.operations.keys() {
            members.push(Member::callable(name.as_str()));
            members.push(Member::callable(format!("{name}{RAW_SUFFIX}")));
        }
        members.push(Member::callable(RAW_REQUEST));
        members.extend(CHAINABLE.iter().map(|name| Member::callable(*name)));
        members.push(Member::constant("basePath", Value::String(self.config.base_path.clone())));
        members
    }

    fn call<'a>(&'a self, name: &'a str, args: Args) -> BoxFuture<'a, Result<Value, OperationError>> {
        Box::pin(async move {
            let first = args.into_iter().next().unwrap_or(Value::Null);
            if name == RAW_REQUEST {
                let out = generic_request(&first)?;
                return Ok(self.send(name, out).await?.into_value());
            }
            let Some(spec) = self.spec(name) else {
                return Err(OperationError::other(format!(
                    "unknown operation: {}.{name}",
                    self.capability
                )));
            };
            let out = outgoing(spec.method.clone(), spec.path.clone(), &first)?;
            let envelope = self.send(&spec.name, out).await?;
            if name.ends_with(RAW_SUFFIX) && !self.operations.contains_key(name) {
                Ok(envelope.into_value())
            } else {
                Ok(envelope.body)
            }
        })
    }

    fn chain(
        &self,
        name: &str,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> anyhow::Result<Arc<dyn Api>> {
        let mut config = self.config.clone();
        match name {
            "withMiddleware" => config.middleware.extend(middleware),
            "withPreMiddleware" => config
                .middleware
                .extend(middleware.into_iter().map(|m| Arc::new(PreOnly(m)) as Arc<dyn Middleware>)),
            "withPostMiddleware" => config
                .middleware
                .extend(middleware.into_iter().map(|m| Arc::new(PostOnly(m)) as Arc<dyn Middleware>)),
            "clone" => {}
            other => anyhow::bail!("{other} is not a chainable member of {}", self.capability),
        }
        Ok(Arc::new(self.with_config(config)))
    }

    fn route(&self, name: &str) -> Option<Route> {
        self.spec(name).map(|spec| Route { method: spec.method.to_string(), path: spec.path.clone() })
    }
}

fn outgoing(method: Method, path: String, first: &Value) -> Result<Outgoing, OperationError> {
    Ok(Outgoing {
        method,
        path,
        params: first.get("params").and_then(Value::as_object).cloned().unwrap_or_default(),
        query: string_pairs(first.get("query")),
        body: first.get("body").cloned(),
        headers: string_pairs(first.get("headers")).into_iter().collect(),
    })
}

fn generic_request(first: &Value) -> Result<Outgoing, OperationError> {
    let path = first
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| OperationError::other("request requires a path"))?;
    let method = first.get("method").and_then(Value::as_str).unwrap_or("GET");
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| OperationError::other(format!("invalid method: {method}")))?;
    outgoing(method, path.to_owned(), first)
}

fn param(params: &Map<String, Value>, name: &str) -> Result<String, OperationError> {
    match params.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        _ => Err(OperationError::other(format!("missing path parameter: {name}"))),
    }
}

/// Flatten an object of scalars into string pairs. Nulls are skipped.
fn string_pairs(value: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Object(map)) = value else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let v = match v {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((k.clone(), v))
        })
        .collect()
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Only failures where no response reached the client count as network
/// errors. A request that could not be built is a caller error.
fn send_error(e: reqwest::Error) -> OperationError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        OperationError::Network { message: e.to_string() }
    } else {
        OperationError::other(format!("request failed: {e}"))
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
