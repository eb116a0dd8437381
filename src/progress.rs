use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

// ── Progress payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Idle,
    Fetching,
    Completed,
    Error,
}

/// Snapshot of the one fetch run the process may have in flight.
#[derive(Debug, Clone, Serialize)]
pub struct FetchProgress {
    pub status: FetchStatus,
    pub current_account: String,
    pub total_accounts: usize,
    pub current_account_index: usize,
    pub current_email_index: usize,
    pub total_emails: usize,
    pub message: String,
    pub percentage: u32,
}

impl Default for FetchProgress {
    fn default() -> Self {
        Self {
            status: FetchStatus::Idle,
            current_account: String::new(),
            total_accounts: 0,
            current_account_index: 0,
            current_email_index: 0,
            total_emails: 0,
            message: String::new(),
            percentage: 0,
        }
    }
}

impl FetchProgress {
    /// Fresh "fetching" state installed when a run is accepted.
    pub fn starting(current_account: &str, total_accounts: usize) -> Self {
        Self {
            status: FetchStatus::Fetching,
            current_account: current_account.to_string(),
            total_accounts,
            current_account_index: if current_account.is_empty() { 0 } else { 1 },
            message: "Preparing to fetch mail...".to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    Idle,
    Searching,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchProgress {
    pub status: SearchStatus,
    pub message: String,
    pub percentage: u32,
    pub total_emails: usize,
    pub processed_emails: usize,
}

impl Default for SearchProgress {
    fn default() -> Self {
        Self {
            status: SearchStatus::Idle,
            message: String::new(),
            percentage: 0,
            total_emails: 0,
            processed_emails: 0,
        }
    }
}

// ── Shared progress cell ────────────────────────────────────────────────────

struct Guarded<T> {
    value: T,
    epoch: u64,
}

/// Mutex-guarded progress singleton. Background tasks write through
/// `update`, API handlers read cloned snapshots, so reads never tear. Every
/// mutation bumps an epoch so a scheduled reset can tell whether a newer
/// run has taken over in the meantime.
pub struct Progress<T> {
    inner: Mutex<Guarded<T>>,
}

impl<T: Clone + Default> Progress<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Guarded {
                value: T::default(),
                epoch: 0,
            }),
        }
    }

    pub fn snapshot(&self) -> T {
        self.inner.lock().expect("progress lock poisoned").value.clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut guard = self.inner.lock().expect("progress lock poisoned");
        f(&mut guard.value);
        guard.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().expect("progress lock poisoned").epoch
    }

    fn reset_if_stale(&self, seen_epoch: u64) -> bool {
        let mut guard = self.inner.lock().expect("progress lock poisoned");
        if guard.epoch != seen_epoch {
            return false;
        }
        guard.value = T::default();
        guard.epoch += 1;
        true
    }
}

impl<T: Clone + Default> Default for Progress<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress<FetchProgress> {
    /// Atomically claim the fetch slot. Fails while another run is active:
    /// at most one ingestion run exists process-wide.
    pub fn try_begin(&self, initial: FetchProgress) -> bool {
        let mut guard = self.inner.lock().expect("progress lock poisoned");
        if guard.value.status == FetchStatus::Fetching {
            return false;
        }
        guard.value = initial;
        guard.epoch += 1;
        true
    }
}

/// Reset the progress cell back to idle after `delay`, unless something
/// mutated it in the meantime (a newer run owns the cell then).
pub fn schedule_reset<T>(progress: Arc<Progress<T>>, delay: Duration)
where
    T: Clone + Default + Send + 'static,
{
    let seen_epoch = progress.epoch();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if progress.reset_if_stale(seen_epoch) {
            debug!("progress auto-reset to idle");
        }
    });
}

// ── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_starts_idle() {
        let progress: Progress<FetchProgress> = Progress::new();
        assert_eq!(progress.snapshot().status, FetchStatus::Idle);
    }

    #[test]
    fn second_begin_is_rejected_while_fetching() {
        let progress: Progress<FetchProgress> = Progress::new();
        assert!(progress.try_begin(FetchProgress::starting("alice", 1)));
        assert!(!progress.try_begin(FetchProgress::starting("bob", 1)));
    }

    #[test]
    fn begin_allowed_after_terminal_status() {
        let progress: Progress<FetchProgress> = Progress::new();
        assert!(progress.try_begin(FetchProgress::starting("alice", 1)));
        progress.update(|p| p.status = FetchStatus::Completed);
        assert!(progress.try_begin(FetchProgress::starting("bob", 1)));
    }

    #[tokio::test]
    async fn reset_fires_when_nothing_newer_happened() {
        let progress: Arc<Progress<FetchProgress>> = Arc::new(Progress::new());
        progress.update(|p| p.status = FetchStatus::Error);

        schedule_reset(Arc::clone(&progress), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(progress.snapshot().status, FetchStatus::Idle);
    }

    #[tokio::test]
    async fn stale_reset_does_not_clobber_newer_run() {
        let progress: Arc<Progress<FetchProgress>> = Arc::new(Progress::new());
        progress.update(|p| p.status = FetchStatus::Error);

        schedule_reset(Arc::clone(&progress), Duration::from_millis(10));
        // a newer run claims the cell before the timer fires
        assert!(progress.try_begin(FetchProgress::starting("alice", 1)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(progress.snapshot().status, FetchStatus::Fetching);
    }
}
