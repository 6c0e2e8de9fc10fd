// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concrete HTTP handler over reqwest: shared configuration, middleware,
//! and the per-capability [`HttpApi`].

pub mod api;
pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use crate::token::TokenStore;

pub use api::{HttpApi, OperationSpec};
pub use middleware::{
    LogClientErrors, Middleware, PostOnly, PreOnly, RequestContext, ResponseContext,
};

/// Where the configuration's bearer token comes from.
#[derive(Clone)]
pub enum AccessTokenSource {
    /// Fixed token, or none.
    Static(Option<String>),
    /// Read the current access token from a store on every request.
    Store(Arc<dyn TokenStore>),
}

impl AccessTokenSource {
    pub async fn resolve(&self) -> Option<String> {
        match self {
            Self::Static(token) => token.clone(),
            Self::Store(store) => {
                store.get_tokens().await.and_then(|t| t.access().map(str::to_owned))
            }
        }
    }
}

/// Settings shared by every handler built from one client.
#[derive(Clone)]
pub struct Configuration {
    pub base_path: String,
    pub client: reqwest::Client,
    pub access_token: AccessTokenSource,
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl Configuration {
    /// Build a configuration with its own HTTP client.
    pub fn new(base_path: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_path: base_path.into().trim_end_matches('/').to_owned(),
            client,
            access_token: AccessTokenSource::Static(None),
            middleware: Vec::new(),
        })
    }

    pub fn with_access_token(mut self, source: AccessTokenSource) -> Self {
        self.access_token = source;
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
