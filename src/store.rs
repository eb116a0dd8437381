use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

pub const NOTIFICATION_CAP: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Persisted records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub path: String,
}

/// One archived message. Written once at ingestion, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmail {
    pub id: String,
    pub account: String,
    pub subject: String,
    #[serde(rename = "from")]
    pub sender: String,
    pub date: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountsFile {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub emails: Vec<AccountEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// API view of the accounts file: passwords stripped, counts added.
#[derive(Debug, Clone, Serialize)]
pub struct AccountsView {
    pub server: String,
    pub emails: Vec<AccountView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub user: String,
    pub email_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub time: String,
}

// ── Store ───────────────────────────────────────────────────────────────────

/// File-backed store rooted at the configured data directory:
///
///   accounts.json                      configured mailbox accounts
///   emails/<account>/<id>.json         one record per archived message
///   attachments/<id>/<filename>        raw attachment payloads
///   notifications.json                 bounded operational event log
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let store = Self {
            data_dir: data_dir.to_path_buf(),
        };
        fs::create_dir_all(store.emails_dir())?;
        fs::create_dir_all(store.attachments_dir())?;
        Ok(store)
    }

    pub fn emails_dir(&self) -> PathBuf {
        self.data_dir.join("emails")
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join("attachments")
    }

    fn accounts_file(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }

    fn notifications_file(&self) -> PathBuf {
        self.data_dir.join("notifications.json")
    }

    fn account_dir(&self, account: &str) -> PathBuf {
        self.emails_dir().join(account)
    }

    // ── Accounts ────────────────────────────────────────────────────────────

    /// Read the configured accounts. A missing or corrupt file reads as an
    /// empty configuration; account setup is external to this process.
    pub fn accounts(&self) -> AccountsFile {
        let path = self.accounts_file();
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("accounts.json is malformed, treating as empty: {}", e);
                AccountsFile::default()
            }),
            Err(_) => AccountsFile::default(),
        }
    }

    pub fn accounts_with_counts(&self) -> AccountsView {
        let accounts = self.accounts();
        AccountsView {
            server: accounts.server,
            emails: accounts
                .emails
                .iter()
                .map(|entry| AccountView {
                    user: entry.user.clone(),
                    email_count: self.message_count(&entry.user),
                })
                .collect(),
        }
    }

    pub fn find_account(&self, user: &str) -> Option<(String, AccountEntry)> {
        let accounts = self.accounts();
        if accounts.server.is_empty() {
            return None;
        }
        accounts
            .emails
            .into_iter()
            .find(|entry| entry.user == user)
            .map(|entry| (accounts.server, entry))
    }

    // ── Messages ────────────────────────────────────────────────────────────

    /// Persist one message record. The write goes to a temp sibling first and
    /// is renamed into place, so a concurrent reader never sees a torn record.
    pub fn store_message(&self, email: &StoredEmail) -> Result<(), StoreError> {
        let dir = self.account_dir(&email.account);
        fs::create_dir_all(&dir)?;
        let body = serde_json::to_vec_pretty(email)?;
        write_atomic(&dir.join(format!("{}.json", email.id)), &body)?;
        Ok(())
    }

    /// All records for one account, unreadable files skipped, unsorted.
    pub fn read_account_messages(&self, account: &str) -> Vec<StoredEmail> {
        let dir = self.account_dir(account);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut emails = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                match read_email_record(&path) {
                    Some(email) => emails.push(email),
                    None => continue,
                }
            }
        }
        emails
    }

    /// Every account directory that holds stored mail (includes accounts
    /// that have since been removed from the configuration).
    pub fn account_names(&self) -> Vec<String> {
        let entries = match fs::read_dir(self.emails_dir()) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().map_or(false, |t| t.is_dir()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// One account's messages, newest first.
    pub fn account_messages(&self, account: &str) -> Vec<StoredEmail> {
        let mut emails = self.read_account_messages(account);
        sort_newest_first(&mut emails);
        emails
    }

    /// Every stored message across all accounts, newest first.
    pub fn all_messages(&self) -> Vec<StoredEmail> {
        let mut emails = Vec::new();
        for entry in WalkDir::new(self.emails_dir())
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .flatten()
        {
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().map_or(false, |ext| ext == "json")
            {
                if let Some(email) = read_email_record(path) {
                    emails.push(email);
                }
            }
        }
        sort_newest_first(&mut emails);
        emails
    }

    pub fn message_by_id(&self, id: &str) -> Option<StoredEmail> {
        let entries = fs::read_dir(self.emails_dir()).ok()?;
        for entry in entries.flatten() {
            if entry.file_type().map_or(false, |t| t.is_dir()) {
                let candidate = entry.path().join(format!("{}.json", id));
                if candidate.exists() {
                    return read_email_record(&candidate);
                }
            }
        }
        None
    }

    pub fn message_count(&self, account: &str) -> usize {
        match fs::read_dir(self.account_dir(account)) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
                .count(),
            Err(_) => 0,
        }
    }

    // ── Attachments ─────────────────────────────────────────────────────────

    /// Resolve the payload path for an attachment. Rejects anything that
    /// would escape the attachments directory.
    pub fn attachment_path(&self, message_id: &str, filename: &str) -> Option<PathBuf> {
        if !is_safe_component(message_id) || !is_safe_component(filename) {
            return None;
        }
        Some(self.attachments_dir().join(message_id).join(filename))
    }

    // ── Notifications ───────────────────────────────────────────────────────

    /// Read the notification log. Missing or corrupt file reads as empty.
    pub fn notifications(&self) -> Vec<Notification> {
        match fs::read_to_string(self.notifications_file()) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Append an event, keeping only the most recent `NOTIFICATION_CAP`
    /// entries. Write failures are logged, never propagated.
    pub fn add_notification(&self, message: impl Into<String>, kind: NotificationKind) {
        let mut notifications = self.notifications();
        notifications.push(Notification {
            message: message.into(),
            kind,
            time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        if notifications.len() > NOTIFICATION_CAP {
            let drop = notifications.len() - NOTIFICATION_CAP;
            notifications.drain(..drop);
        }
        if let Err(e) = self.write_notifications(&notifications) {
            warn!("failed to write notifications.json: {}", e);
        }
    }

    pub fn clear_notifications(&self) {
        if let Err(e) = self.write_notifications(&[]) {
            warn!("failed to clear notifications.json: {}", e);
        }
    }

    fn write_notifications(&self, notifications: &[Notification]) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(notifications)?;
        write_atomic(&self.notifications_file(), &body)?;
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn read_email_record(path: &Path) -> Option<StoredEmail> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(email) => Some(email),
        Err(e) => {
            warn!("skipping unreadable message record {:?}: {}", path, e);
            None
        }
    }
}

fn sort_newest_first(emails: &mut [StoredEmail]) {
    // Canonical dates ("YYYY-MM-DD HH:MM:SS") sort chronologically as plain
    // strings; records whose date never parsed sort by their literal value.
    emails.sort_by(|a, b| b.date.cmp(&a.date));
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

fn is_safe_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains('/')
        && !value.contains('\\')
}

// ── Unit tests ──────────────────────────────────────────────────────────────
