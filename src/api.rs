use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::ingest;
use crate::progress::{FetchProgress, FetchStatus, SearchStatus};
use crate::search;
use crate::store::StoredEmail;
use crate::AppState;

#[derive(Debug)]
struct Unauthorized;
impl warp::reject::Reject for Unauthorized {}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_reply(status: StatusCode, message: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            error: message.to_string(),
        }),
        status,
    )
}

fn success_reply() -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&json!({"success": true})), StatusCode::OK)
}

// ── Filters ─────────────────────────────────────────────────────────────────

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&state))
}

/// Shared bearer-token check for every /api route. An empty configured key
/// disables the check entirely.
fn authorized(state: Arc<AppState>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let access_key = state.config.access_key.clone();
            async move {
                if check_access(&access_key, header.as_deref()) {
                    Ok(())
                } else {
                    Err(warp::reject::custom(Unauthorized))
                }
            }
        })
        .untuple_one()
}

fn check_access(access_key: &str, header: Option<&str>) -> bool {
    if access_key.is_empty() {
        return true;
    }
    let header = match header {
        Some(header) => header,
        None => return false,
    };
    let mut parts = header.splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(token)) => {
            scheme.eq_ignore_ascii_case("bearer") && token == access_key
        }
        _ => false,
    }
}

// ── Routes ──────────────────────────────────────────────────────────────────

pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&json!({"status": "ok"})));

    let accounts = warp::path!("accounts")
        .and(warp::get())
        .and(with_state(Arc::clone(&state)))
        .and_then(get_accounts);

    let emails_all = warp::path!("emails")
        .and(warp::get())
        .and(with_state(Arc::clone(&state)))
        .and_then(get_all_emails);

    let emails_account = warp::path!("emails" / String)
        .and(warp::get())
        .and(with_state(Arc::clone(&state)))
        .and_then(get_account_emails);

    let email_detail = warp::path!("email" / String)
        .and(warp::get())
        .and(with_state(Arc::clone(&state)))
        .and_then(get_email);

    let attachment = warp::path!("attachments" / String / String)
        .and(warp::get())
        .and(with_state(Arc::clone(&state)))
        .and_then(get_attachment);

    let fetch_progress = warp::path!("fetch" / "progress")
        .and(warp::get())
        .and(with_state(Arc::clone(&state)))
        .and_then(get_fetch_progress);

    let fetch_all = warp::path!("fetch" / "all")
        .and(warp::post())
        .and(with_state(Arc::clone(&state)))
        .and_then(start_fetch_all);

    let fetch_account = warp::path!("fetch" / String)
        .and(warp::post())
        .and(with_state(Arc::clone(&state)))
        .and_then(start_fetch_account);

    let search_progress = warp::path!("search" / "progress")
        .and(warp::get())
        .and(with_state(Arc::clone(&state)))
        .and_then(get_search_progress);

    let search_results = warp::path!("search" / "results")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state(Arc::clone(&state)))
        .and_then(get_search_results);

    let search_start = warp::path!("search")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state(Arc::clone(&state)))
        .and_then(start_search);

    let notifications = warp::path!("notifications")
        .and(warp::get())
        .and(with_state(Arc::clone(&state)))
        .and_then(get_notifications);

    let notifications_clear = warp::path!("notifications" / "clear")
        .and(warp::post())
        .and(with_state(Arc::clone(&state)))
        .and_then(clear_notifications);

    let api = warp::path("api").and(authorized(state)).and(
        accounts
            .or(emails_all)
            .or(emails_account)
            .or(email_detail)
            .or(attachment)
            .or(fetch_progress)
            .or(fetch_all)
            .or(fetch_account)
            .or(search_progress)
            .or(search_results)
            .or(search_start)
            .or(notifications)
            .or(notifications_clear),
    );

    health.or(api).recover(handle_rejection)
}

// ── Read handlers ───────────────────────────────────────────────────────────

async fn get_accounts(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&state.store.accounts_with_counts()))
}

async fn get_all_emails(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&state.store.all_messages()))
}

async fn get_account_emails(
    account: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&state.store.account_messages(&account)))
}

async fn get_email(id: String, state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    match state.store.message_by_id(&id) {
        Some(email) => Ok(warp::reply::with_status(
            warp::reply::json(&email),
            StatusCode::OK,
        )),
        None => Ok(error_reply(StatusCode::NOT_FOUND, "Email not found")),
    }
}

async fn get_attachment(
    email_id: String,
    filename: String,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Infallible> {
    let payload = match state.store.attachment_path(&email_id, &filename) {
        Some(path) => tokio::fs::read(path).await.ok(),
        None => None,
    };

    let response: Result<warp::reply::Response, warp::http::Error> = match payload {
        Some(bytes) => warp::http::Response::builder()
            .header("content-type", "application/octet-stream")
            .header(
                "content-disposition",
                format!("attachment; filename=\"{}\"", filename),
            )
            .body(bytes.into()),
        None => warp::http::Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("content-type", "application/json")
            .body(r#"{"error":"Attachment not found"}"#.into()),
    };

    Ok(response.unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

async fn get_fetch_progress(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&state.fetch.snapshot()))
}

async fn get_search_progress(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&state.search.snapshot()))
}

async fn get_notifications(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&state.store.notifications()))
}

async fn clear_notifications(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    state.store.clear_notifications();
    Ok(success_reply())
}

// ── Fetch handlers ──────────────────────────────────────────────────────────

async fn start_fetch_all(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    if !state.fetch.try_begin(FetchProgress::starting("", 0)) {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "A fetch is already running",
        ));
    }

    info!("starting all-accounts fetch");
    let task_state = Arc::clone(&state);
    tokio::spawn(ingest::run_fetch_all(task_state));
    Ok(success_reply())
}

async fn start_fetch_account(
    account: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Infallible> {
    if state.fetch.snapshot().status == FetchStatus::Fetching {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "A fetch is already running",
        ));
    }

    let (server, entry) = match state.store.find_account(&account) {
        Some(found) => found,
        None => return Ok(error_reply(StatusCode::NOT_FOUND, "Account not found")),
    };

    // Authoritative claim; the snapshot check above is only a fast path.
    if !state.fetch.try_begin(FetchProgress::starting(&account, 1)) {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "A fetch is already running",
        ));
    }

    info!("starting fetch for account {}", account);
    let task_state = Arc::clone(&state);
    tokio::spawn(ingest::run_single_fetch(task_state, server, entry));
    Ok(success_reply())
}

// ── Search handlers ─────────────────────────────────────────────────────────

fn query_param(query: &HashMap<String, String>) -> Option<String> {
    query
        .get("q")
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
}

async fn start_search(
    query: HashMap<String, String>,
    state: Arc<AppState>,
) -> Result<impl Reply, Infallible> {
    let q = match query_param(&query) {
        Some(q) => q,
        None => {
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                "Query parameter is required",
            ))
        }
    };

    info!("starting search for {:?}", q);
    let task_state = Arc::clone(&state);
    tokio::task::spawn_blocking(move || search::run_search(&task_state, &q));
    Ok(success_reply())
}

async fn get_search_results(
    query: HashMap<String, String>,
    state: Arc<AppState>,
) -> Result<impl Reply, Infallible> {
    if query_param(&query).is_none() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "Query parameter is required",
        ));
    }

    // Results only materialize once the scan has finished; a request made
    // mid-search gets an empty list instead of blocking.
    if state.search.snapshot().status != SearchStatus::Completed {
        return Ok(warp::reply::with_status(
            warp::reply::json(&Vec::<StoredEmail>::new()),
            StatusCode::OK,
        ));
    }

    let results = state.search_results.lock().unwrap().clone();
    Ok(warp::reply::with_status(
        warp::reply::json(&results),
        StatusCode::OK,
    ))
}

// ── Rejection rendering ─────────────────────────────────────────────────────

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    let (status, message) = if err.find::<Unauthorized>().is_some() {
        (StatusCode::UNAUTHORIZED, "Unauthorized")
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };
    Ok(error_reply(status, message))
}

// ── Unit tests ──────────────────────────────────────────────────────────────
