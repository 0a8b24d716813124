// packages/pipeline/src/model/page.rs
//! Request context shared by every event captured while serving it

use crate::model::params::ParamMap;
use crate::utils::errors::{LoggerError, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Serialize, Serializer};

/// One external request/session
///
/// Everything but `id` is fixed at construction. `id` is assigned at most
/// once, by the first backend that durably stores the page, and reused by
/// every later event that references it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    /// Storage-assigned identifier (serialized as 0 while unset)
    #[serde(serialize_with = "serialize_id")]
    id: OnceCell<i64>,

    /// Requested URI
    pub uri: String,

    /// Time the request was received
    pub request_time: DateTime<Utc>,

    /// Query string parameters
    pub query: ParamMap,

    /// Session variables
    pub session: ParamMap,

    /// Cookies
    pub cookie: ParamMap,

    /// User or session identifier, when known
    pub user: Option<String>,
}

impl PageContext {
    pub fn new(uri: impl Into<String>, request_time: DateTime<Utc>) -> Self {
        Self {
            id: OnceCell::new(),
            uri: uri.into(),
            request_time,
            query: ParamMap::new(),
            session: ParamMap::new(),
            cookie: ParamMap::new(),
            user: None,
        }
    }

    pub fn with_query(mut self, query: ParamMap) -> Self {
        self.query = query;
        self
    }

    pub fn with_session(mut self, session: ParamMap) -> Self {
        self.session = session;
        self
    }

    pub fn with_cookie(mut self, cookie: ParamMap) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Assigned identifier, if the page has been persisted
    pub fn id(&self) -> Option<i64> {
        self.id.get().copied()
    }

    /// Assign the identifier. Fails if one was already assigned.
    pub fn assign_id(&self, id: i64) -> Result<()> {
        self.id.set(id).map_err(|_| {
            LoggerError::InvalidOperation(format!(
                "page {} already has id {}",
                self.uri,
                self.id().unwrap_or_default()
            ))
        })
    }

    /// Return the identifier, running `insert` to obtain it if unset.
    ///
    /// `insert` runs at most once per page across all callers; concurrent
    /// callers block until it finishes. A failed insert leaves the id unset.
    pub fn id_or_try_insert<F>(&self, insert: F) -> Result<i64>
    where
        F: FnOnce(&PageContext) -> Result<i64>,
    {
        self.id.get_or_try_init(|| insert(self)).copied()
    }
}

fn serialize_id<S: Serializer>(id: &OnceCell<i64>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_i64(id.get().copied().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn page() -> PageContext {
        PageContext::new("/checkout?step=2", Utc::now())
    }

    #[test]
    fn test_id_unset_by_default() {
        let page = page();
        assert_eq!(page.id(), None);

        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["id"], 0);
        assert_eq!(json["uri"], "/checkout?step=2");
    }

    #[test]
    fn test_assign_id_once() {
        let page = page();
        page.assign_id(42).unwrap();
        assert_eq!(page.id(), Some(42));

        let again = page.assign_id(43);
        assert!(matches!(again, Err(LoggerError::InvalidOperation(_))));
        assert_eq!(page.id(), Some(42));
    }

    #[test]
    fn test_insert_runs_once() {
        let page = page();
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let id = page
                .id_or_try_insert(|_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(9)
                })
                .unwrap();
            assert_eq!(id, 9);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_insert_leaves_id_unset() {
        let page = page();
        let result = page.id_or_try_insert(|_| Err(LoggerError::Write("down".into())));
        assert!(result.is_err());
        assert_eq!(page.id(), None);

        assert_eq!(page.id_or_try_insert(|_| Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_concurrent_insert_runs_once() {
        let page = Arc::new(page());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let page = Arc::clone(&page);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    page.id_or_try_insert(|_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(77)
                    })
                    .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 77);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
