use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::imap::{self, ImapSession};
use crate::mime;
use crate::progress::{self, FetchStatus};
use crate::store::{AccountEntry, NotificationKind, Store, StoredEmail};
use crate::AppState;

pub const ERROR_RESET_DELAY: Duration = Duration::from_secs(3);
pub const COMPLETE_RESET_DELAY: Duration = Duration::from_secs(5);

// ── Deduplication index ─────────────────────────────────────────────────────

/// Per-account (subject, date) index, rebuilt once per fetch from the
/// persisted records and updated as the run stores new messages, so
/// duplicates inside the mailbox itself are caught too.
pub struct DedupIndex {
    seen: HashSet<(String, String)>,
}

impl DedupIndex {
    pub fn build(store: &Store, account: &str) -> Self {
        let seen = store
            .read_account_messages(account)
            .into_iter()
            .map(|email| (email.subject, email.date))
            .collect();
        Self { seen }
    }

    pub fn contains(&self, subject: &str, date: &str) -> bool {
        self.seen
            .contains(&(subject.to_string(), date.to_string()))
    }

    pub fn insert(&mut self, subject: String, date: String) {
        self.seen.insert((subject, date));
    }
}

// ── Single-account fetch ────────────────────────────────────────────────────

/// Connect, enumerate the inbox newest-first, decode, dedupe, persist.
/// Per-message failures are logged and skipped; a returned error is
/// terminal for this account (connect/login/listing failures).
async fn fetch_account(
    state: &Arc<AppState>,
    server: &str,
    account: &AccountEntry,
) -> Result<(), String> {
    let user = account.user.clone();
    state.fetch.update(|p| {
        p.current_account = user.clone();
        p.message = format!("Connecting to mail server {}...", server);
    });

    let mut session = imap::connect(server, &user, &account.password).await?;

    let mut uids = imap::inbox_uids(&mut session).await?;
    uids.reverse(); // newest first
    let total = uids.len();

    state.fetch.update(|p| {
        p.total_emails = total;
        p.message = format!("Found {} messages, downloading...", total);
    });

    let mut dedup = DedupIndex::build(&state.store, &user);

    for (i, uid) in uids.into_iter().enumerate() {
        state.fetch.update(|p| {
            p.current_email_index = i + 1;
            p.percentage = percent(i + 1, total);
            p.message = format!("Processing message {}/{}...", i + 1, total);
        });

        if let Err(e) = ingest_one(state, &mut session, &user, uid, &mut dedup).await {
            warn!("account {}: message uid={} failed: {}", user, uid, e);
            state.store.add_notification(
                format!("Account {}: failed to process a message: {}", user, e),
                NotificationKind::Error,
            );
            state
                .fetch
                .update(|p| p.message = format!("Error processing message: {}", e));
        }
    }

    imap::logout(session).await;

    info!(
        "account {}: fetch finished, {} messages stored locally",
        user,
        state.store.message_count(&user)
    );

    state.fetch.update(|p| {
        p.status = FetchStatus::Completed;
        p.percentage = 100;
        p.message = format!("Finished fetching mail for {}", user);
    });
    Ok(())
}

async fn ingest_one(
    state: &Arc<AppState>,
    session: &mut ImapSession,
    user: &str,
    uid: u32,
    dedup: &mut DedupIndex,
) -> Result<(), String> {
    let raw = imap::fetch_raw(session, uid)
        .await?
        .ok_or_else(|| format!("no body returned for UID {}", uid))?;
    let parsed =
        mailparse::parse_mail(&raw).map_err(|e| format!("MIME parse failed: {}", e))?;
    let envelope = mime::decode_envelope(&parsed);

    if dedup.contains(&envelope.subject, &envelope.date) {
        state.fetch.update(|p| {
            p.message = format!("Skipping already stored message: {}", envelope.subject)
        });
        return Ok(());
    }

    let id = Uuid::new_v4().to_string();
    let content = mime::extract_content(&parsed);
    let attachments = mime::save_attachments(&parsed, &state.store.attachments_dir(), &id)
        .map_err(|e| e.to_string())?;

    let email = StoredEmail {
        id,
        account: user.to_string(),
        subject: envelope.subject.clone(),
        sender: envelope.from,
        date: envelope.date.clone(),
        content,
        attachments,
    };
    state.store.store_message(&email).map_err(|e| e.to_string())?;
    dedup.insert(envelope.subject, envelope.date);
    Ok(())
}

fn percent(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((done as f64 / total as f64) * 100.0).round() as u32
}

// ── Detached entry points ───────────────────────────────────────────────────

/// Single-account run, spawned by the fetch endpoint after the progress
/// slot was claimed. Terminal errors surface through FetchProgress and the
/// notification log; the slot resets to idle after a delay either way.
pub async fn run_single_fetch(state: Arc<AppState>, server: String, account: AccountEntry) {
    match fetch_account(&state, &server, &account).await {
        Ok(()) => progress::schedule_reset(Arc::clone(&state.fetch), COMPLETE_RESET_DELAY),
        Err(e) => {
            error!("account {}: fetch failed: {}", account.user, e);
            state.store.add_notification(
                format!("Account {}: fetch failed: {}", account.user, e),
                NotificationKind::Error,
            );
            state.fetch.update(|p| {
                p.status = FetchStatus::Error;
                p.message = format!("Fetch failed: {}", e);
            });
            progress::schedule_reset(Arc::clone(&state.fetch), ERROR_RESET_DELAY);
        }
    }
}

/// All-accounts run. Accounts are fetched sequentially; one account's
/// failure is logged and the next account proceeds.
pub async fn run_fetch_all(state: Arc<AppState>) {
    let accounts = state.store.accounts();
    let total = accounts.emails.len();
    state.fetch.update(|p| p.total_accounts = total);

    if accounts.server.is_empty() || accounts.emails.is_empty() {
        warn!("fetch-all requested with no accounts configured");
        state
            .store
            .add_notification("No accounts configured", NotificationKind::Error);
        state.fetch.update(|p| {
            p.status = FetchStatus::Error;
            p.message = "No accounts configured".to_string();
            p.percentage = 0;
        });
        progress::schedule_reset(Arc::clone(&state.fetch), ERROR_RESET_DELAY);
        return;
    }

    for (i, account) in accounts.emails.iter().enumerate() {
        state.fetch.update(|p| {
            p.current_account_index = i + 1;
            p.percentage = percent(i + 1, total);
        });
        if let Err(e) = fetch_account(&state, &accounts.server, account).await {
            error!("account {}: fetch failed: {}", account.user, e);
            state.store.add_notification(
                format!("Account {}: fetch failed: {}", account.user, e),
                NotificationKind::Error,
            );
        }
    }

    state.fetch.update(|p| {
        p.status = FetchStatus::Completed;
        p.message = "All mail fetched".to_string();
        p.percentage = 100;
    });
    progress::schedule_reset(Arc::clone(&state.fetch), COMPLETE_RESET_DELAY);
}

// ── Unit tests ──────────────────────────────────────────────────────────────
