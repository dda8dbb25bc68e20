//! Per-request-pair scratch state, linking a request's decoded plaintext to its response.
//!
//! Session ids are engine-supplied monotonic integers. Each session owns exactly one staging
//! slot, populated on the request half and consumed (removed) on the response half, so a
//! session can never observe another session's plaintext even under high concurrency.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Allocates monotonic session ids and holds the request-side staging slots.
#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    staged: DashMap<u64, String>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            staged: DashMap::new(),
        }
    }

    /// Allocates a fresh session id for one request/response round-trip.
    pub fn begin(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Stashes the request-side plaintext for `session`, to be consumed by its response half.
    pub fn stage_request(&self, session: u64, plaintext: String) {
        self.staged.insert(session, plaintext);
    }

    /// Consumes and returns the staged request-side plaintext for `session`, if the request
    /// half decoded successfully. Removing the entry here (rather than merely reading it)
    /// keeps the map bounded: a session is visited at most once on the response side.
    pub fn take_request(&self, session: u64) -> Option<String> {
        self.staged.remove(&session).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_monotonic() {
        let registry = SessionRegistry::new();
        let a = registry.begin();
        let b = registry.begin();
        assert!(b > a);
    }

    #[test]
    fn staged_plaintext_is_consumed_exactly_once() {
        let registry = SessionRegistry::new();
        let session = registry.begin();
        registry.stage_request(session, "{}".to_string());
        assert_eq!(registry.take_request(session), Some("{}".to_string()));
        assert_eq!(registry.take_request(session), None);
    }

    #[test]
    fn sessions_do_not_alias_each_other() {
        let registry = SessionRegistry::new();
        let a = registry.begin();
        let b = registry.begin();
        registry.stage_request(a, "a-request".to_string());
        registry.stage_request(b, "b-request".to_string());
        assert_eq!(registry.take_request(b), Some("b-request".to_string()));
        assert_eq!(registry.take_request(a), Some("a-request".to_string()));
    }

    #[test]
    fn missing_request_half_leaves_no_response_event() {
        let registry = SessionRegistry::new();
        let session = registry.begin();
        assert_eq!(registry.take_request(session), None);
    }
}
