// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::config::Timings;
use crate::refresh::{epoch_secs, TokenRefresher};
use crate::report::ErrorReporter;
use crate::test_support::{
    jwt_with_exp, pair_expiring_at, response_error, token_expired, MockApi, MockRefresher,
    RecordingHandler,
};
use crate::token::{MemoryTokenStore, TokenStore};
use crate::wrap::{wrap, AuthConfig, LoginBinding, ReactiveApi};

struct Setup {
    api: ReactiveApi,
    handler: MockApi,
    store: Arc<MemoryTokenStore>,
    transport: Arc<MockRefresher>,
    recorder: RecordingHandler,
    refresh_failed: Arc<AtomicU32>,
    refresher: Arc<TokenRefresher>,
}

fn setup(handler: MockApi, transport: Arc<MockRefresher>, initial: Option<TokenPair>) -> Setup {
    let store = Arc::new(MemoryTokenStore::new(initial));
    let recorder = RecordingHandler::new();
    let reporter = Arc::new(ErrorReporter::new(Some(recorder.handler()), Duration::from_secs(60)));
    let timings = Timings { refresh_cooldown: Duration::from_millis(50), ..Timings::default() };
    let refresher =
        TokenRefresher::new(store.clone(), transport.clone(), Arc::clone(&reporter), timings);

    let refresh_failed = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&refresh_failed);
    let auth = AuthConfig::new(store.clone()).on_refresh_failed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let ctx = Arc::new(WrapContext {
        auth: Some(auth),
        refresher: Some(Arc::clone(&refresher)),
        reporter,
        login: LoginBinding::default(),
    });
    let api = wrap(handler.clone().into_api(), ctx);
    Setup { api, handler, store, transport, recorder, refresh_failed, refresher }
}

fn user_api() -> MockApi {
    MockApi::new("user").operations(&["me", "update"]).route("me", "GET", "/api/v1/user/me")
}

fn stored() -> Option<TokenPair> {
    Some(pair_expiring_at(epoch_secs() + 3600, "r-old"))
}

fn new_pair() -> TokenPair {
    TokenPair::new(jwt_with_exp(epoch_secs() + 7200), "r-new")
}

#[tokio::test]
async fn success_populates_response() -> anyhow::Result<()> {
    let s = setup(user_api(), MockRefresher::returning(new_pair()), stored());
    s.handler.respond("me", Ok(json!({ "success": true, "data": { "id": 1 } })));

    let op = s.api.operation("me")?;
    let result = op.execute(vec![]).await;

    assert_eq!(result, Some(json!({ "success": true, "data": { "id": 1 } })));
    assert_eq!(op.response().get(), result);
    assert_eq!(op.error().get(), None);
    assert!(!op.pending().get());
    assert!(!op.is_retrying().get());
    assert_eq!(s.recorder.count(), 0);
    Ok(())
}

#[tokio::test]
async fn instantiations_do_not_share_state() -> anyhow::Result<()> {
    let s = setup(user_api().delay(Duration::from_millis(40)), MockRefresher::returning(new_pair()), stored());
    let busy = Arc::new(s.api.operation("me")?);
    let idle = s.api.operation("me")?;

    let running = Arc::clone(&busy);
    let task = tokio::spawn(async move { running.execute(vec![]).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(busy.pending().get());
    assert!(!idle.pending().get());

    task.await?;
    assert!(!busy.pending().get());
    assert_eq!(idle.response().get(), None);
    Ok(())
}

#[tokio::test]
async fn execute_resets_previous_outcome() -> anyhow::Result<()> {
    let s = setup(user_api(), MockRefresher::returning(new_pair()), stored());
    let op = s.api.operation("me")?;

    s.handler.respond("me", Err(response_error(500, "boom")));
    assert_eq!(op.execute(vec![]).await, None);
    assert!(op.error().get().is_some());

    s.handler.respond("me", Ok(json!({ "ok": true })));
    assert_eq!(op.execute(vec![]).await, Some(json!({ "ok": true })));
    assert_eq!(op.error().get(), None);
    Ok(())
}

#[tokio::test]
async fn api_failure_is_normalized_and_reported() -> anyhow::Result<()> {
    let s = setup(user_api(), MockRefresher::returning(new_pair()), stored());
    s.handler.respond("me", Err(response_error(403, "Forbidden")));

    let op = s.api.operation("me")?;
    assert_eq!(op.execute(vec![]).await, None);

    let err = op.error().get().ok_or_else(|| anyhow::anyhow!("error not set"))?;
    assert_eq!((err.status, err.message.as_str(), err.path.as_str()), (403, "Forbidden", "/api/v1/user/me"));
    assert!(op.response().get().is_none());

    let contexts = s.recorder.contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].kind, ErrorKind::ApiError);
    assert_eq!(contexts[0].status, Some(403));
    assert_eq!(contexts[0].endpoint, "/api/v1/user/me");
    assert_eq!(contexts[0].method, "GET");
    assert_eq!(contexts[0].error["success"], json!(false));
    assert_eq!(contexts[0].error["status"], json!(403));
    assert_eq!(contexts[0].error["message"], json!("Forbidden"));
    assert_eq!(contexts[0].error["path"], json!("/api/v1/user/me"));
    assert_eq!(s.transport.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn network_failure_is_categorized() -> anyhow::Result<()> {
    let s = setup(user_api(), MockRefresher::returning(new_pair()), stored());
    s.handler.respond("update", Err(OperationError::Network { message: "connection refused".into() }));

    let op = s.api.operation("update")?;
    op.execute(vec![json!({ "method": "patch" })]).await;

    let err = op.error().get().ok_or_else(|| anyhow::anyhow!("error not set"))?;
    assert_eq!(err.status, 0);
    assert_eq!(err.message, "Network error");
    assert_eq!(err.path, "update");

    let contexts = s.recorder.contexts();
    assert_eq!(contexts[0].kind, ErrorKind::NetworkError);
    assert_eq!(contexts[0].method, "PATCH");
    Ok(())
}

#[tokio::test]
async fn concurrent_unauthorized_failures_report_once() -> anyhow::Result<()> {
    let handler = user_api();
    let recorder = RecordingHandler::new();
    let reporter = Arc::new(ErrorReporter::new(Some(recorder.handler()), Duration::from_secs(3)));
    let api = Arc::new(wrap(handler.clone().into_api(), Arc::new(WrapContext::anonymous(reporter))));

    let mut tasks = Vec::new();
    for _ in 0..6 {
        handler.respond("me", Err(token_expired()));
        let op = api.operation("me")?;
        tasks.push(tokio::spawn(async move { (op.execute(vec![]).await, op.error().get()) }));
    }
    for task in tasks {
        let (result, error) = task.await?;
        assert_eq!(result, None);
        assert_eq!(error.map(|e| e.status), Some(401));
    }

    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.contexts()[0].kind, ErrorKind::Unauthorized);
    Ok(())
}

#[tokio::test]
async fn expired_token_refreshes_and_retries_with_bearer() -> anyhow::Result<()> {
    let fresh = new_pair();
    let s = setup(user_api(), MockRefresher::returning(fresh.clone()), stored());
    s.handler.respond("update", Err(token_expired()));
    s.handler.respond("update", Ok(json!({ "success": true })));

    let op = s.api.operation("update")?;
    let args = vec![
        json!({ "params": { "id": "u-1" }, "headers": { "X-Trace": "t" } }),
        json!("second"),
    ];
    let result = op.execute(args).await;

    assert_eq!(result, Some(json!({ "success": true })));
    assert_eq!(op.response().get(), Some(json!({ "success": true })));
    assert_eq!(op.error().get(), None);
    assert!(!op.is_retrying().get());
    assert!(!op.pending().get());

    let calls = s.handler.calls_to("update");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].args[0]["headers"], json!({ "X-Trace": "t" }));
    assert_eq!(
        calls[1].args,
        vec![
            json!({
                "params": { "id": "u-1" },
                "headers": { "X-Trace": "t", "Authorization": format!("Bearer {}", fresh.access_token) },
            }),
            json!("second"),
        ]
    );
    assert_eq!(s.transport.calls(), 1);
    assert_eq!(s.store.snapshot(), Some(TokenPair::new(fresh.access_token, "r-new")));
    assert_eq!(s.recorder.count(), 0);
    assert_eq!(s.refresh_failed.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn expired_message_without_401_still_refreshes() -> anyhow::Result<()> {
    let s = setup(user_api(), MockRefresher::returning(new_pair()), stored());
    s.handler.respond("me", Err(response_error(403, "Token expired")));
    s.handler.respond("me", Ok(json!({ "ok": true })));

    let op = s.api.operation("me")?;
    assert_eq!(op.execute(vec![json!({})]).await, Some(json!({ "ok": true })));
    assert_eq!(s.transport.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn retry_marks_is_retrying_while_refreshing() -> anyhow::Result<()> {
    let transport = MockRefresher::with_result(Ok(new_pair()), Duration::from_millis(40));
    let s = setup(user_api(), transport, stored());
    s.handler.respond("me", Err(token_expired()));

    let op = Arc::new(s.api.operation("me")?);
    let running = Arc::clone(&op);
    let task = tokio::spawn(async move { running.execute(vec![]).await });
    tokio::time::sleep(Duration::from_millis(15)).await;

    assert!(op.is_retrying().get());
    assert!(op.pending().get());
    task.await?;
    assert!(!op.is_retrying().get());
    assert!(!op.pending().get());
    Ok(())
}

#[tokio::test]
async fn refresh_failure_gives_up_with_original_error() -> anyhow::Result<()> {
    let s = setup(user_api(), MockRefresher::failing(response_error(401, "Invalid refresh token")), stored());
    s.handler.respond("me", Err(token_expired()));

    let op = s.api.operation("me")?;
    assert_eq!(op.execute(vec![]).await, None);

    let err = op.error().get().ok_or_else(|| anyhow::anyhow!("error not set"))?;
    assert_eq!((err.status, err.message.as_str()), (401, "Token expired"));
    assert!(!op.is_retrying().get());
    assert_eq!(s.refresh_failed.load(Ordering::SeqCst), 1);
    assert_eq!(s.handler.calls_to("me").len(), 1);

    let kinds: Vec<ErrorKind> = s.recorder.contexts().iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ErrorKind::RefreshFailed]);
    Ok(())
}

#[tokio::test]
async fn second_expiry_is_not_retried_again() -> anyhow::Result<()> {
    let s = setup(user_api(), MockRefresher::returning(new_pair()), stored());
    s.handler.respond("me", Err(token_expired()));
    s.handler.respond("me", Err(token_expired()));
    s.handler.respond("me", Ok(json!("never reached")));

    let op = s.api.operation("me")?;
    assert_eq!(op.execute(vec![]).await, None);

    assert_eq!(s.handler.calls_to("me").len(), 2);
    assert_eq!(s.transport.calls(), 1);
    assert_eq!(op.error().get().map(|e| e.status), Some(401));
    let kinds: Vec<ErrorKind> = s.recorder.contexts().iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ErrorKind::Unauthorized]);
    Ok(())
}

#[tokio::test]
async fn login_stores_tokens_and_arms_scheduler() -> anyhow::Result<()> {
    let handler = MockApi::new("authentication").operations(&["login", "register"]);
    let s = setup(handler, MockRefresher::returning(new_pair()), None);
    let issued = pair_expiring_at(epoch_secs() + 900, "r-login");
    s.handler.respond(
        "login",
        Ok(json!({ "success": true, "data": { "tokens": serde_json::to_value(&issued)? } })),
    );

    let op = s.api.operation("login")?;
    let result = op.execute(vec![json!({ "body": { "email": "a@b.c", "password": "pw" } })]).await;

    assert!(result.is_some());
    assert_eq!(s.store.snapshot(), Some(issued));
    assert!(s.refresher.is_armed());
    Ok(())
}

#[tokio::test]
async fn login_without_tokens_leaves_store_alone() -> anyhow::Result<()> {
    let handler = MockApi::new("authentication").operations(&["login"]);
    let s = setup(handler, MockRefresher::returning(new_pair()), None);
    s.handler.respond("login", Ok(json!({ "success": true, "data": {} })));

    let op = s.api.operation("login")?;
    assert_eq!(op.execute(vec![]).await, Some(json!({ "success": true, "data": {} })));
    assert_eq!(s.store.snapshot(), None);
    assert!(!s.refresher.is_armed());
    Ok(())
}

#[tokio::test]
async fn login_shape_elsewhere_is_not_intercepted() -> anyhow::Result<()> {
    let handler = MockApi::new("user").operations(&["login"]);
    let s = setup(handler, MockRefresher::returning(new_pair()), None);
    let issued = pair_expiring_at(epoch_secs() + 900, "r");
    s.handler.respond("login", Ok(json!({ "data": { "tokens": serde_json::to_value(&issued)? } })));

    s.api.operation("login")?.execute(vec![]).await;
    assert_eq!(s.store.get_tokens().await, None);
    Ok(())
}

#[tokio::test]
async fn rejected_login_is_not_refreshed() -> anyhow::Result<()> {
    let handler = MockApi::new("authentication").operations(&["login"]);
    let s = setup(handler, MockRefresher::returning(new_pair()), stored());
    s.handler.respond("login", Err(response_error(401, "Invalid credentials")));

    let op = s.api.operation("login")?;
    assert_eq!(op.execute(vec![]).await, None);
    assert_eq!(s.transport.calls(), 0);
    assert_eq!(op.error().get().map(|e| e.message), Some("Invalid credentials".to_owned()));
    assert_eq!(s.recorder.contexts()[0].kind, ErrorKind::Unauthorized);
    Ok(())
}

#[test]
fn bearer_merges_into_first_object_argument() {
    let mut args = vec![json!({ "headers": { "authorization": "Bearer old", "X-A": "1" } }), json!(2)];
    inject_bearer(&mut args, "tok");
    assert_eq!(args, vec![json!({ "headers": { "X-A": "1", "Authorization": "Bearer tok" } }), json!(2)]);
}

#[test]
fn bearer_creates_headers_when_absent() {
    let mut args = vec![json!({ "body": { "a": 1 } })];
    inject_bearer(&mut args, "tok");
    assert_eq!(args[0]["headers"]["Authorization"], "Bearer tok");
    assert_eq!(args[0]["body"], json!({ "a": 1 }));
}

#[yare::parameterized(
    empty      = { vec![] },
    scalar     = { vec![json!("id-1")] },
    array      = { vec![json!([1, 2])] },
    second_obj = { vec![json!(1), json!({ "headers": {} })] },
)]
fn bearer_skips_non_object_first_argument(args: Args) {
    let mut injected = args.clone();
    inject_bearer(&mut injected, "tok");
    assert_eq!(injected, args);
}

#[test]
fn observable_notifies_subscribers() {
    let flag = Observable::new(false);
    let mut rx = flag.subscribe();
    flag.set(true);
    assert!(rx.has_changed().unwrap_or(false));
    assert!(*rx.borrow_and_update());
    assert!(flag.get());
}
