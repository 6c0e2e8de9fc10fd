// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests against an in-process API server.
//!
//! Each test binds an axum router on `127.0.0.1:0` and drives the real
//! reqwest-backed client against it.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use envlink::client::{ClientOptions, EnvlinkClient};
use envlink::config::Timings;
use envlink::error::ErrorKind;
use envlink::refresh::epoch_secs;
use envlink::test_support::{jwt_with_exp, RecordingHandler};
use envlink::token::persist::FileTokenStore;
use envlink::token::{MemoryTokenStore, TokenPair, TokenStore};
use envlink::wrap::AuthConfig;

#[derive(Default)]
struct Server {
    valid_access: String,
    next_access: String,
    refresh_calls: u32,
    seen_auth: Vec<String>,
}

type Shared = Arc<Mutex<Server>>;

fn envelope(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "success": false,
            "status": status.as_u16(),
            "message": message,
            "path": "/server/path",
        })),
    )
}

fn bearer(headers: &HeaderMap) -> String {
    headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or("").to_owned()
}

async fn login(State(s): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["password"] != "pw" {
        return envelope(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    let access = jwt_with_exp(epoch_secs() + 900);
    s.lock().valid_access = access.clone();
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": { "tokens": { "accessToken": access, "refreshToken": "r1" } },
        })),
    )
}

async fn refresh(State(s): State<Shared>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut s = s.lock();
    s.refresh_calls += 1;
    if bearer(&headers) != "Bearer r1" {
        return envelope(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }
    s.valid_access = s.next_access.clone();
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": { "accessToken": s.next_access, "refreshToken": "r2" },
        })),
    )
}

async fn me(State(s): State<Shared>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let auth = bearer(&headers);
    let mut s = s.lock();
    s.seen_auth.push(auth.clone());
    if auth != format!("Bearer {}", s.valid_access) {
        return envelope(StatusCode::UNAUTHORIZED, "Token expired");
    }
    (StatusCode::OK, Json(json!({ "success": true, "data": { "id": "u-1" } })))
}

async fn update(
    Path(id): Path<String>,
    Query(query): Query<Value>,
    Json(body): Json<Value>,
) -> Json<Value> {
    Json(json!({ "id": id, "query": query, "body": body }))
}

async fn forbidden() -> (StatusCode, Json<Value>) {
    envelope(StatusCode::FORBIDDEN, "Forbidden")
}

async fn serve(state: Shared) -> anyhow::Result<String> {
    let router = Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/refresh", post(refresh))
        .route("/api/v1/user/me", get(me))
        .route("/api/v1/user/{id}", patch(update))
        .route("/api/v1/sessions", get(forbidden))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

fn timings() -> Timings {
    Timings { refresh_cooldown: Duration::from_millis(200), ..Timings::default() }
}

fn client(base: &str, store: Arc<dyn TokenStore>, recorder: &RecordingHandler) -> anyhow::Result<EnvlinkClient> {
    EnvlinkClient::new(
        ClientOptions::new(base)
            .timeout(Duration::from_secs(5))
            .timings(timings())
            .auth(AuthConfig::new(store))
            .on_error(recorder.handler()),
    )
}

#[tokio::test]
async fn login_stores_tokens_and_arms_timer() -> anyhow::Result<()> {
    let state = Shared::default();
    let base = serve(Arc::clone(&state)).await?;
    let store = Arc::new(MemoryTokenStore::new(None));
    let recorder = RecordingHandler::new();
    let client = client(&base, store.clone(), &recorder)?;

    let login = client.operation("authentication", "login")?;
    let result = login
        .execute(vec![json!({ "body": { "email": "a@b.c", "password": "pw" } })])
        .await
        .ok_or_else(|| anyhow::anyhow!("login failed: {:?}", login.error().get()))?;

    let issued: TokenPair = serde_json::from_value(result["data"]["tokens"].clone())?;
    assert_eq!(store.snapshot(), Some(issued));
    let delay = client.refresher().and_then(|r| r.armed_delay()).unwrap_or_default();
    assert!(delay > Duration::from_secs(830) && delay <= Duration::from_secs(840), "{delay:?}");
    assert_eq!(recorder.count(), 0);
    Ok(())
}

#[tokio::test]
async fn expired_token_is_refreshed_and_call_retried() -> anyhow::Result<()> {
    let fresh = jwt_with_exp(epoch_secs() + 3600);
    let state = Arc::new(Mutex::new(Server { next_access: fresh.clone(), ..Server::default() }));
    let base = serve(Arc::clone(&state)).await?;
    let stale = jwt_with_exp(epoch_secs() + 1800);
    let store = Arc::new(MemoryTokenStore::new(Some(TokenPair::new(stale.clone(), "r1"))));
    let recorder = RecordingHandler::new();
    let client = client(&base, store.clone(), &recorder)?;

    let me = client.operation("user", "me")?;
    let result = me.execute(vec![json!({})]).await;

    assert_eq!(result, Some(json!({ "success": true, "data": { "id": "u-1" } })));
    assert_eq!(me.error().get(), None);
    assert!(!me.is_retrying().get());
    assert_eq!(store.snapshot(), Some(TokenPair::new(fresh.clone(), "r2")));

    let server = state.lock();
    assert_eq!(server.refresh_calls, 1);
    assert_eq!(server.seen_auth, vec![format!("Bearer {stale}"), format!("Bearer {fresh}")]);
    drop(server);
    assert_eq!(recorder.count(), 0);
    Ok(())
}

#[tokio::test]
async fn concurrent_expiries_share_one_refresh() -> anyhow::Result<()> {
    let fresh = jwt_with_exp(epoch_secs() + 3600);
    let state = Arc::new(Mutex::new(Server { next_access: fresh, ..Server::default() }));
    let base = serve(Arc::clone(&state)).await?;
    let store = Arc::new(MemoryTokenStore::new(Some(TokenPair::new("stale", "r1"))));
    let recorder = RecordingHandler::new();
    let client = Arc::new(client(&base, store, &recorder)?);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let op = client.operation("user", "me")?;
        tasks.push(tokio::spawn(async move { op.execute(vec![json!({})]).await }));
    }
    for task in tasks {
        assert!(task.await?.is_some());
    }
    assert_eq!(state.lock().refresh_calls, 1);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_reports_and_gives_up() -> anyhow::Result<()> {
    let state = Shared::default();
    let base = serve(Arc::clone(&state)).await?;
    let store = Arc::new(MemoryTokenStore::new(Some(TokenPair::new("stale", "revoked"))));
    let recorder = RecordingHandler::new();
    let client = client(&base, store.clone(), &recorder)?;

    let me = client.operation("user", "me")?;
    assert_eq!(me.execute(vec![]).await, None);

    let err = me.error().get().ok_or_else(|| anyhow::anyhow!("error not set"))?;
    assert_eq!((err.status, err.message.as_str()), (401, "Token expired"));
    let contexts = recorder.contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].kind, ErrorKind::RefreshFailed);
    assert_eq!(contexts[0].endpoint, "/api/v1/auth/refresh");
    assert_eq!(contexts[0].status, Some(401));
    assert_eq!(store.snapshot(), Some(TokenPair::new("stale", "revoked")));
    Ok(())
}

#[tokio::test]
async fn error_envelope_is_normalized() -> anyhow::Result<()> {
    let base = serve(Shared::default()).await?;
    let recorder = RecordingHandler::new();
    let client = client(&base, Arc::new(MemoryTokenStore::new(None)), &recorder)?;

    let sessions = client.operation("sessions", "getAll")?;
    assert_eq!(sessions.execute(vec![]).await, None);

    let err = sessions.error().get().ok_or_else(|| anyhow::anyhow!("error not set"))?;
    assert!(!err.success);
    assert_eq!(err.status, 403);
    assert_eq!(err.message, "Forbidden");
    assert_eq!(err.path, "/server/path");
    assert_eq!(recorder.contexts()[0].kind, ErrorKind::ApiError);
    assert_eq!(recorder.contexts()[0].method, "GET");
    Ok(())
}

#[tokio::test]
async fn bad_credentials_surface_without_refresh() -> anyhow::Result<()> {
    let state = Shared::default();
    let base = serve(Arc::clone(&state)).await?;
    let recorder = RecordingHandler::new();
    let store = Arc::new(MemoryTokenStore::new(Some(TokenPair::new("a", "r1"))));
    let client = client(&base, store, &recorder)?;

    let login = client.operation("authentication", "login")?;
    assert_eq!(login.execute(vec![json!({ "body": { "password": "nope" } })]).await, None);
    assert_eq!(login.error().get().map(|e| e.message), Some("Invalid credentials".to_owned()));
    assert_eq!(state.lock().refresh_calls, 0);
    assert_eq!(recorder.contexts()[0].kind, ErrorKind::Unauthorized);
    Ok(())
}

#[tokio::test]
async fn params_query_and_body_reach_server() -> anyhow::Result<()> {
    let base = serve(Shared::default()).await?;
    let recorder = RecordingHandler::new();
    let client = client(&base, Arc::new(MemoryTokenStore::new(None)), &recorder)?;

    let update = client.operation("user", "update")?;
    let result = update
        .execute(vec![json!({
            "params": { "id": "u 1" },
            "query": { "notify": true },
            "body": { "name": "Ada" },
        })])
        .await;
    assert_eq!(
        result,
        Some(json!({ "id": "u 1", "query": { "notify": "true" }, "body": { "name": "Ada" } }))
    );
    Ok(())
}

#[tokio::test]
async fn raw_members_return_envelopes() -> anyhow::Result<()> {
    let base = serve(Shared::default()).await?;
    let recorder = RecordingHandler::new();
    let client = client(&base, Arc::new(MemoryTokenStore::new(None)), &recorder)?;
    let user = client.capability("user")?;

    let raw = user
        .raw("updateRaw")?
        .call(vec![json!({ "params": { "id": "7" }, "body": {} })])
        .await?;
    assert_eq!(raw["status"], 200);
    assert_eq!(raw["body"]["id"], "7");
    assert!(raw["headers"]["content-type"].as_str().unwrap_or("").starts_with("application/json"));

    let generic = user
        .raw("request")?
        .call(vec![json!({ "method": "patch", "path": "/api/v1/user/9", "body": { "x": 1 } })])
        .await?;
    assert_eq!(generic["body"]["id"], "9");
    assert_eq!(generic["body"]["body"], json!({ "x": 1 }));

    let denied = client.capability("sessions")?.raw("getAllRaw")?.call(vec![]).await;
    assert_eq!(denied.err().and_then(|e| e.status()), Some(403));
    assert_eq!(recorder.count(), 0);
    Ok(())
}

#[tokio::test]
async fn static_token_is_sent_as_bearer() -> anyhow::Result<()> {
    let access = jwt_with_exp(epoch_secs() + 600);
    let state = Arc::new(Mutex::new(Server { valid_access: access.clone(), ..Server::default() }));
    let base = serve(Arc::clone(&state)).await?;
    let client = EnvlinkClient::new(ClientOptions::new(&base).static_token(access))?;

    let me = client.operation("user", "me")?;
    assert!(me.execute(vec![]).await.is_some());
    assert!(client.refresher().is_none());
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() -> anyhow::Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let base = format!("http://{}", listener.local_addr()?);
    drop(listener);
    let recorder = RecordingHandler::new();
    let client = client(&base, Arc::new(MemoryTokenStore::new(None)), &recorder)?;

    let me = client.operation("user", "me")?;
    assert_eq!(me.execute(vec![]).await, None);
    assert_eq!(me.error().get().map(|e| e.status), Some(0));
    assert_eq!(recorder.contexts()[0].kind, ErrorKind::NetworkError);
    Ok(())
}

#[tokio::test]
async fn login_persists_to_file_store() -> anyhow::Result<()> {
    let base = serve(Shared::default()).await?;
    let dir = tempfile::tempdir()?;
    let store = Arc::new(FileTokenStore::in_dir(dir.path()));
    let recorder = RecordingHandler::new();
    let client = client(&base, store.clone(), &recorder)?;

    client
        .operation("authentication", "login")?
        .execute(vec![json!({ "body": { "email": "a@b.c", "password": "pw" } })])
        .await
        .ok_or_else(|| anyhow::anyhow!("login failed"))?;

    let reopened = FileTokenStore::in_dir(dir.path());
    assert_eq!(reopened.snapshot(), store.snapshot());
    assert_eq!(reopened.snapshot().and_then(|t| t.refresh().map(str::to_owned)), Some("r1".to_owned()));
    Ok(())
}
