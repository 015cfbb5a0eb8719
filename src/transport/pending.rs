//! Pending request table.
//!
//! Correlates each in-flight request id with the sender that completes the
//! caller's [`PendingResponse`](crate::PendingResponse). Every entry is
//! completed at most once: either by its response or by [`PendingTable::fail_all`].

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::ResponseFrame;

// ============================================================================
// Types
// ============================================================================

/// Completion half of a pending request.
pub type Completion = oneshot::Sender<Result<ResponseFrame>>;

// ============================================================================
// PendingTable
// ============================================================================

/// Map of request ids to completions.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: FxHashMap<RequestId, Completion>,
}

impl PendingTable {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a completion for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `id` is already registered. Ids are
    /// generated fresh per request, so this indicates a bug.
    pub fn register(&mut self, id: RequestId, completion: Completion) -> Result<()> {
        debug_assert!(
            !self.entries.contains_key(&id),
            "request id {id} registered twice"
        );

        if self.entries.contains_key(&id) {
            return Err(Error::protocol(format!("duplicate request id: {id}")));
        }

        self.entries.insert(id, completion);
        Ok(())
    }

    /// Completes and removes the entry for `response.id`.
    ///
    /// Returns `false` when no entry matched, which happens for late
    /// responses after the entry was removed.
    pub fn resolve(&mut self, response: ResponseFrame) -> bool {
        match self.entries.remove(&response.id) {
            Some(completion) => {
                trace!(id = %response.id, ok = response.ok, "Resolving pending request");
                // The caller may have dropped its PendingResponse.
                let _ = completion.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Removes an entry without completing it.
    pub fn remove(&mut self, id: &RequestId) -> Option<Completion> {
        self.entries.remove(id)
    }

    /// Fails every entry with [`Error::Disconnected`] and clears the table.
    ///
    /// Returns the number of entries failed.
    pub fn fail_all(&mut self) -> usize {
        let count = self.entries.len();

        for (_, completion) in self.entries.drain() {
            let _ = completion.send(Err(Error::Disconnected));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on disconnect");
        }

        count
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `id` is pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_delivers_once() {
        let mut table = PendingTable::new();
        let (tx, mut rx) = oneshot::channel();
        let id = RequestId::new("a");

        table.register(id.clone(), tx).expect("register");
        assert!(table.contains(&id));

        let response = ResponseFrame::success(id.clone(), json!(1));
        assert!(table.resolve(response.clone()));
        assert!(table.is_empty());

        let delivered = rx.try_recv().expect("delivered").expect("ok");
        assert_eq!(delivered, response);

        // A second response with the same id is discarded.
        assert!(!table.resolve(response));
    }

    #[test]
    fn test_unmatched_response_is_ignored() {
        let mut table = PendingTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.register(RequestId::new("a"), tx).expect("register");

        assert!(!table.resolve(ResponseFrame::success(RequestId::new("b"), json!(null))));
        assert_eq!(table.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fail_all() {
        let mut table = PendingTable::new();
        let mut receivers = Vec::new();

        for i in 0..3u64 {
            let (tx, rx) = oneshot::channel();
            table.register(RequestId::from(i), tx).expect("register");
            receivers.push(rx);
        }

        assert_eq!(table.fail_all(), 3);
        assert!(table.is_empty());

        for mut rx in receivers {
            let result = rx.try_recv().expect("completed");
            assert!(matches!(result, Err(Error::Disconnected)));
        }

        // Safe on an empty table.
        assert_eq!(table.fail_all(), 0);
    }

    #[test]
    fn test_resolve_after_caller_dropped() {
        let mut table = PendingTable::new();
        let (tx, rx) = oneshot::channel();
        table.register(RequestId::new("a"), tx).expect("register");
        drop(rx);

        assert!(table.resolve(ResponseFrame::success(RequestId::new("a"), json!(null))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut table = PendingTable::new();
        let (tx, _rx) = oneshot::channel();
        let id = RequestId::new("a");
        table.register(id.clone(), tx).expect("register");

        assert!(table.remove(&id).is_some());
        assert!(table.remove(&id).is_none());
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_duplicate_id_rejected() {
        let mut table = PendingTable::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        table.register(RequestId::new("a"), tx1).expect("register");
        assert!(matches!(
            table.register(RequestId::new("a"), tx2),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_id_asserts() {
        let mut table = PendingTable::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        table.register(RequestId::new("a"), tx1).expect("register");
        let _ = table.register(RequestId::new("a"), tx2);
    }
}
