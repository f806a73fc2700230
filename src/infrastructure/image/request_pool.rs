//! In-flight decode bookkeeping: coalescing and cancellation.
//!
//! One entry per [`RequestKey`] with a decode running. Callers asking for a
//! key that is already in flight are added as observers of the running
//! decode instead of starting another one. Observers are owned by the pool
//! and addressed by [`ObserverToken`]s, so a caller that goes away only has
//! to hand its token back.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{RenditionRecord, RequestKey};

/// Callback receiving the outcome of a decode.
pub type Completion = Box<dyn FnOnce(Option<RenditionRecord>) + Send + 'static>;

/// Identifies one registered observer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObserverToken {
    key: RequestKey,
    id: u64,
}

impl ObserverToken {
    /// Key the observer is waiting on.
    #[must_use]
    pub const fn key(&self) -> &RequestKey {
        &self.key
    }
}

/// Handed to whoever runs the decode for a new entry.
#[derive(Debug, Clone)]
pub struct DecodeTicket {
    key: RequestKey,
    entry_id: u64,
    cancelled: Arc<AtomicBool>,
}

impl DecodeTicket {
    /// Key being decoded.
    #[must_use]
    pub const fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Advisory flag: true while nobody is waiting for the result.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Result of [`RequestPool::enqueue`].
#[derive(Debug)]
pub struct Enqueued {
    /// True if the caller must start the decode.
    pub is_new_decode: bool,
    /// Token to cancel this observer.
    pub token: ObserverToken,
    /// Present exactly when `is_new_decode` is true.
    pub ticket: Option<DecodeTicket>,
}

struct Pending {
    entry_id: u64,
    observers: HashMap<u64, Completion>,
    cancelled: Arc<AtomicBool>,
}

/// Tracks in-flight decodes per request key.
#[derive(Default)]
pub struct RequestPool {
    entries: Mutex<HashMap<RequestKey, Pending>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPool")
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl RequestPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `completion` for `key`.
    ///
    /// The first registration for a key creates the entry and returns a
    /// [`DecodeTicket`]; the caller is then responsible for running the
    /// decode and calling [`complete`](Self::complete). Later registrations
    /// join the running decode. Joining an entry whose observers had all
    /// cancelled clears its cancel flag.
    pub fn enqueue(&self, key: RequestKey, completion: Completion) -> Enqueued {
        let observer_id = self.next_id();
        let token = ObserverToken {
            key: key.clone(),
            id: observer_id,
        };

        let mut entries = self.entries.lock();
        if let Some(pending) = entries.get_mut(&key) {
            pending.observers.insert(observer_id, completion);
            if pending.cancelled.swap(false, Ordering::AcqRel) {
                debug!(key = %key, "Rejoined cancelled decode");
            }
            trace!(key = %key, observers = pending.observers.len(), "Coalesced onto in-flight decode");
            return Enqueued {
                is_new_decode: false,
                token,
                ticket: None,
            };
        }

        let entry_id = self.next_id();
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut observers = HashMap::new();
        observers.insert(observer_id, completion);
        entries.insert(
            key.clone(),
            Pending {
                entry_id,
                observers,
                cancelled: Arc::clone(&cancelled),
            },
        );
        trace!(key = %key, "New decode entry");

        Enqueued {
            is_new_decode: true,
            token,
            ticket: Some(DecodeTicket {
                key,
                entry_id,
                cancelled,
            }),
        }
    }

    /// Removes one observer. Returns false if it was no longer registered
    /// (already notified or already cancelled).
    ///
    /// When the last observer leaves, the decode is asked to stop; it may
    /// still run to completion.
    pub fn cancel(&self, token: &ObserverToken) -> bool {
        let dropped = {
            let mut entries = self.entries.lock();
            let Some(pending) = entries.get_mut(&token.key) else {
                return false;
            };
            let Some(completion) = pending.observers.remove(&token.id) else {
                return false;
            };
            if pending.observers.is_empty() {
                pending.cancelled.store(true, Ordering::Release);
                debug!(key = %token.key, "All observers cancelled, decode flagged");
            }
            completion
        };
        // Dropped outside the lock: the closure may own arbitrary state.
        drop(dropped);
        true
    }

    /// Cooperative cancellation point for the decode.
    ///
    /// Returns false, retiring the entry, only if the cancel flag is raised
    /// and the entry still has nobody waiting. The decode should then stop
    /// without calling [`complete`](Self::complete).
    pub fn checkpoint(&self, ticket: &DecodeTicket) -> bool {
        if !ticket.is_cancelled() {
            return true;
        }

        let mut entries = self.entries.lock();
        match entries.get(&ticket.key) {
            Some(pending) if pending.entry_id == ticket.entry_id => {
                if pending.observers.is_empty() {
                    entries.remove(&ticket.key);
                    debug!(key = %ticket.key, "Decode abandoned at checkpoint");
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    /// Finishes the decode for `ticket`, notifying each observer exactly
    /// once. Observers run after the lock is released, so they may call
    /// back into the pool. Returns the number of observers notified.
    pub fn complete(&self, ticket: &DecodeTicket, result: Option<RenditionRecord>) -> usize {
        let observers = {
            let mut entries = self.entries.lock();
            match entries.get(&ticket.key) {
                Some(pending) if pending.entry_id == ticket.entry_id => entries
                    .remove(&ticket.key)
                    .map(|pending| pending.observers)
                    .unwrap_or_default(),
                _ => {
                    trace!(key = %ticket.key, "Completion for retired entry ignored");
                    return 0;
                }
            }
        };

        let count = observers.len();
        for (_, completion) in observers {
            completion(result.clone());
        }
        trace!(key = %ticket.key, notified = count, success = result.is_some(), "Decode completed");
        count
    }

    /// Number of keys with a decode in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if `key` has a decode in flight.
    #[must_use]
    pub fn is_pending(&self, key: &RequestKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Observers currently waiting on `key`.
    #[must_use]
    pub fn observer_count(&self, key: &RequestKey) -> usize {
        self.entries
            .lock()
            .get(key)
            .map_or(0, |pending| pending.observers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::domain::entities::{CacheKey, DisplayScale, PointSize, RenditionSource};

    fn key(name: &str) -> RequestKey {
        RequestKey::new(CacheKey::new(name), PointSize::new(50.0, 50.0), DisplayScale::ONE)
    }

    fn record() -> RenditionRecord {
        RenditionRecord::new(
            Arc::new(image::DynamicImage::new_rgb8(5, 5)),
            RenditionSource::Processed,
        )
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Completion {
        let counter = Arc::clone(counter);
        Box::new(move |result| {
            assert!(result.is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_first_enqueue_starts_decode() {
        let pool = RequestPool::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = pool.enqueue(key("a"), counting(&calls));
        let second = pool.enqueue(key("a"), counting(&calls));
        let other = pool.enqueue(key("b"), counting(&calls));

        assert!(first.is_new_decode);
        assert!(first.ticket.is_some());
        assert!(!second.is_new_decode);
        assert!(second.ticket.is_none());
        assert!(other.is_new_decode);
        assert_eq!(pool.observer_count(&key("a")), 2);
        assert_eq!(pool.in_flight(), 2);
    }

    #[test]
    fn test_complete_notifies_all_once_and_removes_entry() {
        let pool = RequestPool::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let ticket = pool.enqueue(key("a"), counting(&calls)).ticket.unwrap();
        for _ in 0..4 {
            pool.enqueue(key("a"), counting(&calls));
        }

        assert_eq!(pool.complete(&ticket, Some(record())), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(!pool.is_pending(&key("a")));
        assert_eq!(pool.complete(&ticket, Some(record())), 0);
    }

    #[test]
    fn test_observers_share_identical_result() {
        let pool = RequestPool::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = |seen: &Arc<Mutex<Vec<RenditionRecord>>>| -> Completion {
            let seen = Arc::clone(seen);
            Box::new(move |result| seen.lock().push(result.unwrap()))
        };

        let ticket = pool.enqueue(key("a"), sink(&seen)).ticket.unwrap();
        pool.enqueue(key("a"), sink(&seen));
        pool.complete(&ticket, Some(record()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].same_bitmap(&seen[1]));
    }

    #[test]
    fn test_cancel_removes_only_that_observer() {
        let pool = RequestPool::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = pool.enqueue(key("a"), counting(&calls));
        let second = pool.enqueue(key("a"), counting(&calls));
        let ticket = first.ticket.unwrap();

        assert!(pool.cancel(&second.token));
        assert!(!pool.cancel(&second.token));
        assert!(!ticket.is_cancelled());

        assert_eq!(pool.complete(&ticket, Some(record())), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_cancel_flags_decode_and_checkpoint_retires() {
        let pool = RequestPool::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = pool.enqueue(key("a"), counting(&calls));
        let ticket = first.ticket.unwrap();

        assert!(pool.checkpoint(&ticket));
        assert!(pool.cancel(&first.token));
        assert!(ticket.is_cancelled());

        assert!(!pool.checkpoint(&ticket));
        assert!(!pool.is_pending(&key("a")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let again = pool.enqueue(key("a"), counting(&calls));
        assert!(again.is_new_decode, "a retired entry must not absorb new requests");
        assert_eq!(pool.complete(&ticket, Some(record())), 0);
    }

    #[test]
    fn test_rejoining_cancelled_decode_clears_flag() {
        let pool = RequestPool::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = pool.enqueue(key("a"), counting(&calls));
        let ticket = first.ticket.unwrap();
        pool.cancel(&first.token);
        assert!(ticket.is_cancelled());

        let rejoin = pool.enqueue(key("a"), counting(&calls));
        assert!(!rejoin.is_new_decode);
        assert!(!ticket.is_cancelled());
        assert!(pool.checkpoint(&ticket));

        assert_eq!(pool.complete(&ticket, Some(record())), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_decode_can_still_complete() {
        let pool = RequestPool::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = pool.enqueue(key("a"), counting(&calls));
        let ticket = first.ticket.unwrap();
        pool.cancel(&first.token);

        assert_eq!(pool.complete(&ticket, Some(record())), 0);
        assert!(!pool.is_pending(&key("a")));
    }

    #[test]
    fn test_observer_may_reenter_pool() {
        let pool = Arc::new(RequestPool::new());
        let reentered = Arc::new(AtomicBool::new(false));

        let completion: Completion = {
            let pool = Arc::clone(&pool);
            let reentered = Arc::clone(&reentered);
            Box::new(move |_| {
                let next = pool.enqueue(key("a"), Box::new(|_| {}));
                reentered.store(next.is_new_decode, Ordering::SeqCst);
            })
        };

        let ticket = pool.enqueue(key("a"), completion).ticket.unwrap();
        pool.complete(&ticket, None);

        assert!(reentered.load(Ordering::SeqCst));
        assert!(pool.is_pending(&key("a")));
    }

    #[test]
    fn test_failure_is_delivered_as_none() {
        let pool = RequestPool::new();
        let got_none = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&got_none);

        let ticket = pool
            .enqueue(key("a"), Box::new(move |r| flag.store(r.is_none(), Ordering::SeqCst)))
            .ticket
            .unwrap();
        pool.complete(&ticket, None);

        assert!(got_none.load(Ordering::SeqCst));
    }
}
