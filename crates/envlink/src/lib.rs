// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envlink: token-managing API client with reactive operations,
//! single-flight refresh and proactive refresh scheduling.

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod refresh;
pub mod report;
pub mod test_support;
pub mod token;
pub mod wrap;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::client::{ClientOptions, EnvlinkClient};
use crate::config::{Command, Config};
use crate::error::NormalizedError;
use crate::http::LogClientErrors;
use crate::report::handler_fn;
use crate::token::persist::FileTokenStore;
use crate::token::{TokenPair, TokenStore};
use crate::wrap::{classify, Args, AuthConfig, OperationKind, RAW_SUFFIX};

/// Build a client for the command line: file-backed tokens unless a static
/// access token was given.
pub fn build_client(config: &Config, store: &Arc<FileTokenStore>) -> anyhow::Result<EnvlinkClient> {
    let on_error = handler_fn(|ctx| async move {
        tracing::error!(
            kind = %ctx.kind,
            status = ?ctx.status,
            endpoint = %ctx.endpoint,
            method = %ctx.method,
            error = %ctx.error,
            "api error"
        );
    });
    let mut options = ClientOptions::new(&config.base_url)
        .timeout(config.timeout())
        .timings(config.timings())
        .on_error(on_error)
        .middleware(Arc::new(LogClientErrors));
    match config.access_token {
        Some(ref token) => options = options.static_token(token),
        None => {
            let tokens: Arc<dyn TokenStore> = Arc::clone(store) as Arc<dyn TokenStore>;
            let auth = AuthConfig::new(tokens).on_refresh_failed(|| {
                tracing::warn!("token refresh failed; run `envlink login` again");
            });
            options = options.auth(auth);
        }
    }
    EnvlinkClient::new(options)
}

/// Run one CLI command to completion.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    let state_dir = config.resolved_state_dir();
    let store = Arc::new(FileTokenStore::in_dir(&state_dir));
    tracing::debug!(state_dir = %state_dir.display(), "using token store");

    match config.command {
        Command::Login { ref email, ref password } => {
            let client = build_client(&config, &store)?;
            let login = client.operation("authentication", "login")?;
            let args = vec![json!({ "body": { "email": email, "password": password } })];
            if login.execute(args).await.is_none() {
                return Err(failure(login.error().get()));
            }
            match store.snapshot() {
                Some(tokens) => print_json(&describe_tokens(&tokens))?,
                None => anyhow::bail!("login succeeded but returned no tokens"),
            }
        }
        Command::Call { ref capability, ref operation, ref args, raw } => {
            let client = build_client(&config, &store)?;
            client.init_scheduler().await;
            let args = parse_args(args)?;
            let value = if raw {
                let member = match classify(operation) {
                    OperationKind::RawPassthrough => operation.clone(),
                    _ => format!("{operation}{RAW_SUFFIX}"),
                };
                client
                    .capability(capability)?
                    .raw(&member)?
                    .call(args)
                    .await
                    .map_err(|e| anyhow::anyhow!("{capability}.{operation} failed: {e}"))?
            } else {
                let op = client.operation(capability, operation)?;
                match op.execute(args).await {
                    Some(value) => value,
                    None => return Err(failure(op.error().get())),
                }
            };
            print_json(&value)?;
        }
        Command::Tokens => match store.snapshot() {
            Some(tokens) => print_json(&describe_tokens(&tokens))?,
            None => anyhow::bail!("no stored tokens in {}", store.path().display()),
        },
        Command::Logout => {
            store.clear()?;
            tracing::info!("tokens cleared");
        }
        Command::Watch => {
            let client = build_client(&config, &store)?;
            if !client.init_scheduler().await {
                anyhow::bail!("no stored tokens to keep fresh; run `envlink login` first");
            }
            if let Some(delay) = client.refresher().and_then(|r| r.armed_delay()) {
                tracing::info!(in_secs = delay.as_secs(), "next refresh scheduled");
            }
            let shutdown = CancellationToken::new();
            spawn_signal_handler(shutdown.clone());
            shutdown.cancelled().await;
            if let Some(refresher) = client.refresher() {
                refresher.cancel_timer();
            }
            tracing::info!("stopped watching");
        }
    }
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        shutdown.cancel();
    });
}

/// Parse each CLI argument as a JSON value.
pub fn parse_args(raw: &[String]) -> anyhow::Result<Args> {
    raw.iter()
        .enumerate()
        .map(|(i, arg)| {
            serde_json::from_str(arg).map_err(|e| anyhow::anyhow!("argument {i} is not valid JSON: {e}"))
        })
        .collect()
}

/// Printable summary of a token pair with its decoded expiry.
pub fn describe_tokens(tokens: &TokenPair) -> Value {
    let expires_at = tokens
        .access_expiry()
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
        .map(|t| t.to_rfc3339());
    let expires_in = tokens.access_expiry().map(|exp| exp - refresh::epoch_secs());
    json!({
        "accessToken": tokens.access_token,
        "refreshToken": tokens.refresh_token,
        "expiresAt": expires_at,
        "expiresInSecs": expires_in,
    })
}

fn failure(error: Option<NormalizedError>) -> anyhow::Error {
    match error {
        Some(e) => anyhow::anyhow!("{} ({}): {}", e.path, e.status, e.message),
        None => anyhow::anyhow!("operation did not complete"),
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
