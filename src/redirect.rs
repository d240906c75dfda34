//! The redirect getter flow: show the stored text when activated, commit new
//! text on apply, and tell the invoker whether the apply succeeded.
//!
//! The store is shared with other callers, so the text read by
//! [`load_text`] may be stale by the time [`apply_text`] commits. The last
//! commit wins.

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::CommitFailurePolicy,
    store::{PreferenceStore, StoreError},
};

pub const REDIRECT_STORE: &str = "RedirectData";
pub const TEXT_KEY: &str = "text";

/// The result handed back to whoever started the redirect flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectResult {
    Ok,
    Canceled,
}

impl RedirectResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Canceled => "canceled",
        }
    }
}

/// The stored redirect text, or `""` when nothing was stored yet.
pub fn load_text(store: &PreferenceStore) -> String {
    store.get(REDIRECT_STORE, TEXT_KEY, "")
}

pub fn apply_text(
    store: &PreferenceStore,
    text: &str,
    policy: CommitFailurePolicy,
) -> Result<RedirectResult, StoreError> {
    match store.try_put(REDIRECT_STORE, TEXT_KEY, text) {
        Ok(()) => {
            info!(store = REDIRECT_STORE, "redirect text applied");
            Ok(RedirectResult::Ok)
        }
        Err(err) => match policy {
            CommitFailurePolicy::Silent => {
                warn!(store = REDIRECT_STORE, error = %err, "redirect text not committed");
                Ok(RedirectResult::Canceled)
            }
            CommitFailurePolicy::Report => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryBackend;

    fn memory_store() -> (PreferenceStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (PreferenceStore::new(backend.clone()), backend)
    }

    #[test]
    fn load_text_is_empty_before_first_apply() {
        let (store, _) = memory_store();
        assert_eq!(load_text(&store), "");
    }

    #[test]
    fn apply_then_load_round_trips() {
        let (store, _) = memory_store();
        let out = apply_text(&store, "hello", CommitFailurePolicy::Silent).unwrap();
        assert_eq!(out, RedirectResult::Ok);
        assert_eq!(load_text(&store), "hello");
        assert_eq!(store.get(REDIRECT_STORE, TEXT_KEY, ""), "hello");
    }

    #[test]
    fn silent_policy_cancels_without_error() {
        let (store, backend) = memory_store();
        apply_text(&store, "before", CommitFailurePolicy::Silent).unwrap();

        backend.fail_commits(true);
        let out = apply_text(&store, "after", CommitFailurePolicy::Silent).unwrap();
        assert_eq!(out, RedirectResult::Canceled);
        assert_eq!(load_text(&store), "before");
    }

    #[test]
    fn report_policy_surfaces_commit_failure() {
        let (store, backend) = memory_store();
        backend.fail_commits(true);

        let err = apply_text(&store, "after", CommitFailurePolicy::Report).unwrap_err();
        assert!(matches!(err, StoreError::CommitRejected { .. }));
        assert_eq!(load_text(&store), "");
    }

    #[test]
    fn result_strings() {
        assert_eq!(RedirectResult::Ok.as_str(), "ok");
        assert_eq!(RedirectResult::Canceled.as_str(), "canceled");
        assert_eq!(
            serde_json::to_value(RedirectResult::Canceled).unwrap(),
            serde_json::json!("canceled")
        );
    }
}
