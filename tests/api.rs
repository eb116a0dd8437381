use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use mailstash::api;
use mailstash::config::Config;
use mailstash::progress::FetchProgress;
use mailstash::store::{NotificationKind, StoredEmail};
use mailstash::AppState;

fn test_state(access_key: &str) -> (Arc<AppState>, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = Config {
        access_key: access_key.to_string(),
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    (Arc::new(AppState::new(config).expect("open state")), dir)
}

fn seed_email(state: &AppState, id: &str, account: &str, subject: &str, date: &str) {
    state
        .store
        .store_message(&StoredEmail {
            id: id.to_string(),
            account: account.to_string(),
            subject: subject.to_string(),
            sender: "sender@example.com".to_string(),
            date: date.to_string(),
            content: "body".to_string(),
            attachments: Vec::new(),
        })
        .expect("store message");
}

fn body_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("json body")
}

// ── Liveness + auth ─────────────────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_token() {
    let (state, _dir) = test_state("s3cret");
    let routes = api::routes(state);

    let resp = warp::test::request().path("/health").reply(&routes).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(resp.body())["status"], "ok");
}

#[tokio::test]
async fn api_rejects_missing_or_wrong_token() {
    let (state, _dir) = test_state("s3cret");
    let routes = api::routes(state);

    let missing = warp::test::request().path("/api/emails").reply(&routes).await;
    assert_eq!(missing.status(), 401);

    let wrong = warp::test::request()
        .path("/api/emails")
        .header("authorization", "Bearer nope")
        .reply(&routes)
        .await;
    assert_eq!(wrong.status(), 401);

    let right = warp::test::request()
        .path("/api/emails")
        .header("authorization", "Bearer s3cret")
        .reply(&routes)
        .await;
    assert_eq!(right.status(), 200);
}

#[tokio::test]
async fn unauthorized_post_mutates_nothing() {
    let (state, _dir) = test_state("s3cret");
    state
        .store
        .add_notification("keep me", NotificationKind::Info);
    let routes = api::routes(Arc::clone(&state));

    let resp = warp::test::request()
        .method("POST")
        .path("/api/notifications/clear")
        .header("authorization", "Bearer wrong")
        .reply(&routes)
        .await;

    assert_eq!(resp.status(), 401);
    assert_eq!(state.store.notifications().len(), 1);
}

#[tokio::test]
async fn api_is_open_without_configured_key() {
    let (state, _dir) = test_state("");
    let routes = api::routes(state);

    let resp = warp::test::request().path("/api/emails").reply(&routes).await;
    assert_eq!(resp.status(), 200);
}

// ── Read endpoints ──────────────────────────────────────────────────────────

#[tokio::test]
async fn emails_list_is_newest_first() {
    let (state, _dir) = test_state("");
    seed_email(&state, "a1", "alice", "older", "2024-01-01 09:00:00");
    seed_email(&state, "a2", "alice", "newer", "2024-01-02 10:00:00");
    let routes = api::routes(state);

    let resp = warp::test::request().path("/api/emails").reply(&routes).await;
    assert_eq!(resp.status(), 200);
    let body = body_json(resp.body());
    assert_eq!(body[0]["subject"], "newer");
    assert_eq!(body[1]["subject"], "older");
}

#[tokio::test]
async fn account_listing_is_scoped() {
    let (state, _dir) = test_state("");
    seed_email(&state, "a1", "alice", "for alice", "2024-01-01 09:00:00");
    seed_email(&state, "b1", "bob", "for bob", "2024-01-02 10:00:00");
    let routes = api::routes(state);

    let resp = warp::test::request()
        .path("/api/emails/alice")
        .reply(&routes)
        .await;
    let body = body_json(resp.body());
    assert_eq!(body.as_array().map(|a| a.len()), Some(1));
    assert_eq!(body[0]["subject"], "for alice");
}

#[tokio::test]
async fn accounts_carry_counts() {
    let (state, dir) = test_state("");
    std::fs::write(
        dir.path().join("accounts.json"),
        r#"{"server": "imap.example.com", "emails": [{"user": "alice", "password": "pw"}]}"#,
    )
    .expect("write accounts");
    seed_email(&state, "a1", "alice", "one", "2024-01-01 09:00:00");
    let routes = api::routes(state);

    let resp = warp::test::request()
        .path("/api/accounts")
        .reply(&routes)
        .await;
    let body = body_json(resp.body());
    assert_eq!(body["server"], "imap.example.com");
    assert_eq!(body["emails"][0]["email_count"], 1);
    assert!(body["emails"][0].get("password").is_none());
}

#[tokio::test]
async fn email_detail_found_and_missing() {
    let (state, _dir) = test_state("");
    seed_email(&state, "target", "alice", "hello", "2024-01-01 09:00:00");
    let routes = api::routes(state);

    let found = warp::test::request()
        .path("/api/email/target")
        .reply(&routes)
        .await;
    assert_eq!(found.status(), 200);
    assert_eq!(body_json(found.body())["subject"], "hello");

    let missing = warp::test::request()
        .path("/api/email/nope")
        .reply(&routes)
        .await;
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn attachment_download_and_missing() {
    let (state, _dir) = test_state("");
    let dir = state.store.attachments_dir().join("msg-1");
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join("report.pdf"), b"%PDF-1.4\n").expect("write attachment");
    let routes = api::routes(state);

    let found = warp::test::request()
        .path("/api/attachments/msg-1/report.pdf")
        .reply(&routes)
        .await;
    assert_eq!(found.status(), 200);
    assert_eq!(found.body().as_ref(), &b"%PDF-1.4\n"[..]);
    assert_eq!(
        found.headers()["content-type"],
        "application/octet-stream"
    );

    let missing = warp::test::request()
        .path("/api/attachments/msg-1/other.pdf")
        .reply(&routes)
        .await;
    assert_eq!(missing.status(), 404);
}

// ── Fetch endpoints ─────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_progress_starts_idle() {
    let (state, _dir) = test_state("");
    let routes = api::routes(state);

    let resp = warp::test::request()
        .path("/api/fetch/progress")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(resp.body())["status"], "idle");
}

#[tokio::test]
async fn fetch_all_accepted_when_idle() {
    let (state, _dir) = test_state("");
    let routes = api::routes(state);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/fetch/all")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(resp.body())["success"], true);
}

#[tokio::test]
async fn fetch_all_rejected_while_one_runs() {
    let (state, _dir) = test_state("");
    // hold the slot the way an in-flight run would
    assert!(state.fetch.try_begin(FetchProgress::starting("", 0)));
    let routes = api::routes(state);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/fetch/all")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn fetch_unknown_account_is_404() {
    let (state, dir) = test_state("");
    std::fs::write(
        dir.path().join("accounts.json"),
        r#"{"server": "imap.example.com", "emails": [{"user": "alice", "password": "pw"}]}"#,
    )
    .expect("write accounts");
    let routes = api::routes(state);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/fetch/bob")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn fetch_account_busy_takes_priority_over_lookup() {
    let (state, _dir) = test_state("");
    assert!(state.fetch.try_begin(FetchProgress::starting("alice", 1)));
    let routes = api::routes(state);

    // unknown account, but the busy guard answers first
    let resp = warp::test::request()
        .method("POST")
        .path("/api/fetch/bob")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 400);
}

// ── Search endpoints ────────────────────────────────────────────────────────

#[tokio::test]
async fn search_requires_query() {
    let (state, _dir) = test_state("");
    let routes = api::routes(state);

    let start = warp::test::request().path("/api/search").reply(&routes).await;
    assert_eq!(start.status(), 400);

    let results = warp::test::request()
        .path("/api/search/results")
        .reply(&routes)
        .await;
    assert_eq!(results.status(), 400);
}

#[tokio::test]
async fn search_results_empty_before_any_completion() {
    let (state, _dir) = test_state("");
    seed_email(&state, "a1", "alice", "Invoice March", "2024-03-01 10:00:00");
    let routes = api::routes(state);

    let resp = warp::test::request()
        .path("/api/search/results?q=invoice")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(resp.body()), serde_json::json!([]));
}

#[tokio::test]
async fn search_flow_reports_progress_and_results() {
    let (state, _dir) = test_state("");
    seed_email(&state, "a1", "alice", "Invoice March", "2024-03-01 10:00:00");
    seed_email(&state, "a2", "alice", "Meeting notes", "2024-03-02 10:00:00");
    let routes = api::routes(Arc::clone(&state));

    let start = warp::test::request()
        .path("/api/search?q=INVOICE")
        .reply(&routes)
        .await;
    assert_eq!(start.status(), 200);

    // poll until the background scan completes
    let mut completed = false;
    for _ in 0..100 {
        let progress = warp::test::request()
            .path("/api/search/progress")
            .reply(&routes)
            .await;
        if body_json(progress.body())["status"] == "completed" {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(completed, "search never completed");

    let results = warp::test::request()
        .path("/api/search/results?q=INVOICE")
        .reply(&routes)
        .await;
    let body = body_json(results.body());
    assert_eq!(body.as_array().map(|a| a.len()), Some(1));
    assert_eq!(body[0]["subject"], "Invoice March");
}

// ── Notifications ───────────────────────────────────────────────────────────

#[tokio::test]
async fn notifications_read_and_clear() {
    let (state, _dir) = test_state("");
    state
        .store
        .add_notification("something happened", NotificationKind::Error);
    let routes = api::routes(Arc::clone(&state));

    let list = warp::test::request()
        .path("/api/notifications")
        .reply(&routes)
        .await;
    let body = body_json(list.body());
    assert_eq!(body[0]["message"], "something happened");
    assert_eq!(body[0]["type"], "error");

    let clear = warp::test::request()
        .method("POST")
        .path("/api/notifications/clear")
        .reply(&routes)
        .await;
    assert_eq!(clear.status(), 200);
    assert!(state.store.notifications().is_empty());
}
