use tracing::info;

use crate::progress::{SearchProgress, SearchStatus};
use crate::AppState;

/// Scan every stored message across all account directories for a
/// case-insensitive substring match on subject or sender. Runs on a
/// blocking worker; progress is published through the shared singleton and
/// the sorted result set lands in `state.search_results` on completion.
///
/// Searches are deliberately not serialized: a new invocation overwrites
/// the progress and results of a prior one.
pub fn run_search(state: &AppState, query: &str) {
    let needle = query.to_lowercase();

    state.search.update(|p| {
        *p = SearchProgress {
            status: SearchStatus::Searching,
            message: "Searching mail...".to_string(),
            ..SearchProgress::default()
        };
    });

    let accounts = state.store.account_names();
    let total: usize = accounts
        .iter()
        .map(|account| state.store.message_count(account))
        .sum();
    state.search.update(|p| p.total_emails = total);

    let mut results = Vec::new();
    let mut processed = 0usize;

    for account in &accounts {
        for email in state.store.read_account_messages(account) {
            processed += 1;
            if email.subject.to_lowercase().contains(&needle)
                || email.sender.to_lowercase().contains(&needle)
            {
                results.push(email);
            }
            state.search.update(|p| {
                p.processed_emails = processed;
                p.percentage = if total > 0 {
                    ((processed * 100) / total) as u32
                } else {
                    100
                };
            });
        }
    }

    results.sort_by(|a, b| b.date.cmp(&a.date));
    let found = results.len();
    *state.search_results.lock().unwrap() = results;

    state.search.update(|p| {
        *p = SearchProgress {
            status: SearchStatus::Completed,
            message: format!("Search finished, {} matching messages", found),
            percentage: 100,
            total_emails: total,
            processed_emails: total,
        };
    });
    info!("search for {:?} matched {} of {} messages", query, found, total);
}

// ── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::StoredEmail;

    fn state_with_dir(dir: &tempfile::TempDir) -> AppState {
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        AppState::new(config).unwrap()
    }

    fn seed(state: &AppState, id: &str, account: &str, subject: &str, sender: &str, date: &str) {
        state
            .store
            .store_message(&StoredEmail {
                id: id.to_string(),
                account: account.to_string(),
                subject: subject.to_string(),
                sender: sender.to_string(),
                date: date.to_string(),
                content: String::new(),
                attachments: Vec::new(),
            })
            .unwrap();
    }

    #[test]
    fn matches_subject_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_dir(&dir);
        seed(&state, "a1", "alice", "Invoice March", "billing@example.com", "2024-03-01 10:00:00");
        seed(&state, "a2", "alice", "Meeting notes", "boss@example.com", "2024-03-02 10:00:00");

        run_search(&state, "invoice");

        let results = state.search_results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].subject, "Invoice March");
    }

    #[test]
    fn matches_sender_too() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_dir(&dir);
        seed(&state, "a1", "alice", "no match here", "billing@example.com", "2024-03-01 10:00:00");

        run_search(&state, "BILLING");

        assert_eq!(state.search_results.lock().unwrap().len(), 1);
    }

    #[test]
    fn results_span_accounts_and_sort_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_dir(&dir);
        seed(&state, "a1", "alice", "report one", "a@example.com", "2024-01-01 09:00:00");
        seed(&state, "b1", "bob", "report two", "b@example.com", "2024-01-02 10:00:00");

        run_search(&state, "report");

        let results = state.search_results.lock().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].date, "2024-01-02 10:00:00");
    }

    #[test]
    fn completion_publishes_progress() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_dir(&dir);
        seed(&state, "a1", "alice", "hello", "a@example.com", "2024-01-01 09:00:00");

        run_search(&state, "nothing matches this");

        let progress = state.search.snapshot();
        assert_eq!(progress.status, SearchStatus::Completed);
        assert_eq!(progress.percentage, 100);
        assert_eq!(progress.total_emails, 1);
        assert_eq!(progress.processed_emails, 1);
        assert!(state.search_results.lock().unwrap().is_empty());
    }

    #[test]
    fn new_search_overwrites_previous_results() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_dir(&dir);
        seed(&state, "a1", "alice", "alpha", "a@example.com", "2024-01-01 09:00:00");
        seed(&state, "a2", "alice", "beta", "a@example.com", "2024-01-02 09:00:00");

        run_search(&state, "alpha");
        assert_eq!(state.search_results.lock().unwrap()[0].subject, "alpha");

        run_search(&state, "beta");
        let results = state.search_results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].subject, "beta");
    }
}
