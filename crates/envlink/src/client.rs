// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composed client: one wrapped handler per catalog capability, sharing a
//! configuration, an error reporter and a token refresher.
//!
//! Each client owns its own refresh and error-guard state. Two clients in
//! one process never observe each other's flights, timers or cooldowns.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::catalog::{self, AUTHENTICATION, REFRESH_OPERATION};
use crate::config::Timings;
use crate::http::{AccessTokenSource, Configuration, HttpApi, Middleware};
use crate::refresh::{ApiRefresher, RefreshTransport, TokenRefresher};
use crate::report::{ErrorHandler, ErrorReporter};
use crate::wrap::{wrap, Api, AuthConfig, LoginBinding, ReactiveApi, ReactiveOperation, WrapContext};

/// Options for [`EnvlinkClient::new`].
#[derive(Clone)]
pub struct ClientOptions {
    pub base_path: String,
    pub timeout: Duration,
    /// Token store and refresh-failure hook. Enables refresh-and-retry.
    pub auth: Option<AuthConfig>,
    /// Global error callback, rate-limited by `timings.error_cooldown`.
    pub on_error: Option<Arc<dyn ErrorHandler>>,
    /// Bearer token used when `auth` is absent.
    pub static_token: Option<String>,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub timings: Timings,
    pub login: LoginBinding,
}

impl ClientOptions {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            timeout: Duration::from_secs(10),
            auth: None,
            on_error: None,
            static_token: None,
            middleware: Vec::new(),
            timings: Timings::default(),
            login: LoginBinding::default(),
        }
    }

    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn on_error(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.on_error = Some(handler);
        self
    }

    pub fn static_token(mut self, token: impl Into<String>) -> Self {
        self.static_token = Some(token.into());
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }
}

pub struct EnvlinkClient {
    capabilities: IndexMap<String, ReactiveApi>,
    reporter: Arc<ErrorReporter>,
    refresher: Option<Arc<TokenRefresher>>,
}

impl EnvlinkClient {
    /// Build the HTTP handlers for every catalog capability and wrap them.
    pub fn new(options: ClientOptions) -> anyhow::Result<Self> {
        let source = match options.auth.as_ref() {
            Some(auth) => AccessTokenSource::Store(Arc::clone(&auth.tokens)),
            None => AccessTokenSource::Static(options.static_token.clone()),
        };
        let mut config =
            Configuration::new(&options.base_path, options.timeout)?.with_access_token(source);
        config.middleware.extend(options.middleware.iter().cloned());

        let mut handlers: Vec<Arc<dyn Api>> = Vec::with_capacity(catalog::CAPABILITIES.len());
        for name in catalog::CAPABILITIES {
            let ops = catalog::operations(name)
                .ok_or_else(|| anyhow::anyhow!("capability missing from catalog: {name}"))?;
            handlers.push(Arc::new(HttpApi::new(name, config.clone(), ops)));
        }
        let auth_handler = handlers
            .iter()
            .find(|h| h.capability() == AUTHENTICATION)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("catalog has no {AUTHENTICATION} capability"))?;
        let transport: Arc<dyn RefreshTransport> =
            Arc::new(ApiRefresher::new(auth_handler, REFRESH_OPERATION));

        tracing::debug!(base_path = %options.base_path, authenticated = options.auth.is_some(), "building client");
        Ok(Self::compose(handlers, transport, options))
    }

    /// Wrap arbitrary handlers with this client's refresh and error state.
    pub fn compose(
        handlers: Vec<Arc<dyn Api>>,
        transport: Arc<dyn RefreshTransport>,
        options: ClientOptions,
    ) -> Self {
        let reporter = Arc::new(ErrorReporter::new(options.on_error, options.timings.error_cooldown));
        let refresher = options.auth.as_ref().map(|auth| {
            TokenRefresher::new(
                Arc::clone(&auth.tokens),
                transport,
                Arc::clone(&reporter),
                options.timings,
            )
        });
        let ctx = Arc::new(WrapContext {
            auth: options.auth,
            refresher: refresher.clone(),
            reporter: Arc::clone(&reporter),
            login: options.login,
        });
        let capabilities = handlers
            .into_iter()
            .map(|h| (h.capability().to_owned(), wrap(h, Arc::clone(&ctx))))
            .collect();
        Self { capabilities, reporter, refresher }
    }

    pub fn capability(&self, name: &str) -> anyhow::Result<&ReactiveApi> {
        self.capabilities.get(name).ok_or_else(|| anyhow::anyhow!("unknown capability: {name}"))
    }

    /// Instantiate `operation` on `capability` with fresh state.
    pub fn operation(&self, capability: &str, operation: &str) -> anyhow::Result<ReactiveOperation> {
        self.capability(capability)?.operation(operation)
    }

    pub fn capability_names(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(String::as_str)
    }

    /// Arm the refresh scheduler once, if tokens are stored.
    pub async fn init_scheduler(&self) -> bool {
        match self.refresher.as_ref() {
            Some(refresher) => refresher.init_if_needed().await,
            None => false,
        }
    }

    pub fn reset_error_guard(&self) {
        self.reporter.reset_guard();
    }

    pub fn refresher(&self) -> Option<&Arc<TokenRefresher>> {
        self.refresher.as_ref()
    }

    pub fn reporter(&self) -> &Arc<ErrorReporter> {
        &self.reporter
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
