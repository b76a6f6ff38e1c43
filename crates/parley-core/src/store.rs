//! Bounded, expiring store of in-progress negotiations.
//!
//! Entries are keyed by negotiation context. Insertion order doubles as
//! creation order and every entry shares the same timeout, so the expired
//! entries always form a prefix of the order queue: purging and
//! oldest-first eviction are both O(1) amortized.
//!
//! Removal is lazy in the order queue. Each entry carries a sequence number;
//! queue slots whose sequence no longer matches the map are skipped and the
//! queue is compacted when stale slots dominate.
//!
//! States leaving the store through eviction or expiry are disposed after
//! the store lock is released. States handed back by
//! [`NegotiationStateStore::remove_state`] are the caller's to dispose.

use std::{
    collections::{HashMap, VecDeque},
    ops::Sub,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::{
    config::StoreConfig,
    error::StoreError,
    state::{NegotiationPayload, SharedNegotiationState},
};

/// Stale queue slots tolerated before compaction.
const COMPACTION_SLACK: usize = 32;

struct Entry<T: NegotiationPayload, I> {
    state: SharedNegotiationState<T>,
    created: I,
    seq: u64,
}

struct StoreInner<T: NegotiationPayload, I> {
    entries: HashMap<String, Entry<T, I>>,
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl<T, I> StoreInner<T, I>
where
    T: NegotiationPayload,
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Pop the front of the order queue if it is live, skipping stale slots.
    fn pop_oldest(&mut self) -> Option<(String, Entry<T, I>)> {
        while let Some((context, seq)) = self.order.pop_front() {
            if self.entries.get(&context).is_some_and(|entry| entry.seq == seq) {
                let entry = self.entries.remove(&context)?;
                return Some((context, entry));
            }
        }
        None
    }

    /// Peek the creation time of the oldest live entry.
    fn oldest_created(&mut self) -> Option<I> {
        loop {
            let (context, seq) = self.order.front()?;
            let live = self.entries.get(context).filter(|entry| entry.seq == *seq);
            if let Some(entry) = live {
                return Some(entry.created);
            }
            self.order.pop_front();
        }
    }

    fn purge_expired(
        &mut self,
        now: I,
        timeout: Duration,
        out: &mut Vec<SharedNegotiationState<T>>,
    ) {
        while let Some(created) = self.oldest_created() {
            if now < created || now - created < timeout {
                break;
            }
            if let Some((context, entry)) = self.pop_oldest() {
                tracing::debug!(%context, "negotiation state expired");
                out.push(entry.state);
            }
        }
    }

    fn maybe_compact(&mut self) {
        if self.order.len() > self.entries.len() * 2 + COMPACTION_SLACK {
            let entries = &self.entries;
            self.order
                .retain(|(context, seq)| entries.get(context).is_some_and(|e| e.seq == *seq));
        }
    }
}

/// Thread-safe store of in-progress negotiations.
///
/// Clone shares the same underlying storage.
pub struct NegotiationStateStore<T: NegotiationPayload, I> {
    inner: Arc<Mutex<StoreInner<T, I>>>,
    config: StoreConfig,
}

impl<T: NegotiationPayload, I> Clone for NegotiationStateStore<T, I> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), config: self.config.clone() }
    }
}

impl<T, I> NegotiationStateStore<T, I>
where
    T: NegotiationPayload,
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty store. The config is expected to be validated.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            })),
            config,
        }
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Insert state for a new context.
    ///
    /// Expired entries are purged first. When the store is full the oldest
    /// entry is evicted and disposed to make room.
    ///
    /// # Errors
    ///
    /// `DuplicateContext` if a live entry for `context` exists.
    pub fn add_state(
        &self,
        context: impl Into<String>,
        state: SharedNegotiationState<T>,
        now: I,
    ) -> Result<(), StoreError> {
        let context = context.into();
        let mut released = Vec::new();

        let result = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.purge_expired(now, self.config.negotiation_timeout, &mut released);

            if inner.entries.contains_key(&context) {
                Err(StoreError::DuplicateContext(context))
            } else {
                while inner.entries.len() >= self.config.max_entries {
                    let Some((evicted, entry)) = inner.pop_oldest() else {
                        break;
                    };
                    tracing::info!(
                        context = %evicted,
                        max_entries = self.config.max_entries,
                        "negotiation store full, evicting oldest state"
                    );
                    released.push(entry.state);
                }

                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.order.push_back((context.clone(), seq));
                inner.entries.insert(context, Entry { state, created: now, seq });
                inner.maybe_compact();
                Ok(())
            }
        };

        dispose_all(released);
        result
    }

    /// Look up live state for a context.
    pub fn get_state(&self, context: &str, now: I) -> Option<SharedNegotiationState<T>> {
        let mut released = Vec::new();
        let found = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.purge_expired(now, self.config.negotiation_timeout, &mut released);
            inner.entries.get(context).map(|entry| Arc::clone(&entry.state))
        };
        dispose_all(released);
        found
    }

    /// Remove state for a context. Idempotent; returns what was removed.
    pub fn remove_state(&self, context: &str) -> Option<SharedNegotiationState<T>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = inner.entries.remove(context).map(|entry| entry.state);
        inner.maybe_compact();
        removed
    }

    /// Drop and dispose every expired entry. Returns how many were purged.
    pub fn purge_expired(&self, now: I) -> usize {
        let mut released = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.purge_expired(now, self.config.negotiation_timeout, &mut released);
        }
        let purged = released.len();
        dispose_all(released);
        purged
    }

    /// Whether a live entry exists for the context.
    pub fn contains(&self, context: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.contains_key(context)
    }

    /// Number of stored entries, including any not yet purged.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn dispose_all<T: NegotiationPayload>(states: Vec<SharedNegotiationState<T>>) {
    for state in states {
        state.lock().unwrap_or_else(PoisonError::into_inner).dispose();
    }
}
