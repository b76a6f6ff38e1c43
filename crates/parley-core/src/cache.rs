//! Server-side cache of issued session tokens.
//!
//! Entries are keyed by `(context id, key generation)` so a renewed token and
//! the generation it superseded can coexist during key rollover. Each entry
//! has an expiration (the token's `valid_to` unless shortened later) indexed
//! in a `BTreeMap`, which makes both purging and oldest-expiring-first
//! eviction cheap.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
    time::SystemTime,
};

use crate::{config::TokenCacheConfig, token::SessionToken};

type CacheKey = (String, String);

/// Outcome of [`SecurityTokenCache::try_add`] and
/// [`SecurityTokenCache::add_or_replace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAddResult {
    /// Token cached
    Added,
    /// Token cached after evicting the entry closest to expiry
    Evicted(Arc<SessionToken>),
    /// An entry for the same context and generation already exists
    Duplicate,
    /// Token had already expired and was not cached
    AlreadyExpired,
}

struct CacheEntry {
    token: Arc<SessionToken>,
    expires: SystemTime,
    seq: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    by_expiration: BTreeMap<(SystemTime, u64), CacheKey>,
    generations: HashMap<String, HashSet<String>>,
    next_seq: u64,
}

impl CacheInner {
    fn insert(&mut self, token: Arc<SessionToken>) {
        let key = (token.context_id().to_string(), token.key_generation().to_string());
        let seq = self.next_seq;
        self.next_seq += 1;
        let expires = token.valid_to();

        self.by_expiration.insert((expires, seq), key.clone());
        self.generations.entry(key.0.clone()).or_default().insert(key.1.clone());
        self.entries.insert(key, CacheEntry { token, expires, seq });
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Arc<SessionToken>> {
        let entry = self.entries.remove(key)?;
        self.by_expiration.remove(&(entry.expires, entry.seq));
        if let Some(generations) = self.generations.get_mut(&key.0) {
            generations.remove(&key.1);
            if generations.is_empty() {
                self.generations.remove(&key.0);
            }
        }
        Some(entry.token)
    }

    fn purge_expired(&mut self, now: SystemTime) -> usize {
        let mut purged = 0;
        while let Some((&(expires, _), key)) = self.by_expiration.first_key_value() {
            if expires > now {
                break;
            }
            let key = key.clone();
            self.remove(&key);
            purged += 1;
        }
        purged
    }

    fn evict_soonest(&mut self) -> Option<Arc<SessionToken>> {
        let key = self.by_expiration.first_key_value().map(|(_, key)| key.clone())?;
        self.remove(&key)
    }
}

/// Thread-safe, capacity-bounded token cache.
///
/// Clone shares the same underlying storage.
#[derive(Clone)]
pub struct SecurityTokenCache {
    inner: Arc<Mutex<CacheInner>>,
    capacity: usize,
}

impl SecurityTokenCache {
    /// Create an empty cache. The config is expected to be validated.
    pub fn new(config: &TokenCacheConfig) -> Self {
        Self { inner: Arc::new(Mutex::new(CacheInner::default())), capacity: config.capacity }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cache a token unless one with the same context and generation exists.
    pub fn try_add(&self, token: Arc<SessionToken>, now: SystemTime) -> CacheAddResult {
        let mut inner = self.lock();
        inner.purge_expired(now);

        let key = (token.context_id().to_string(), token.key_generation().to_string());
        if inner.entries.contains_key(&key) {
            return CacheAddResult::Duplicate;
        }
        self.insert_bounded(&mut inner, token, now)
    }

    /// Cache a token, replacing any entry with the same context and
    /// generation.
    pub fn add_or_replace(&self, token: Arc<SessionToken>, now: SystemTime) -> CacheAddResult {
        let mut inner = self.lock();
        inner.purge_expired(now);

        let key = (token.context_id().to_string(), token.key_generation().to_string());
        inner.remove(&key);
        self.insert_bounded(&mut inner, token, now)
    }

    fn insert_bounded(
        &self,
        inner: &mut CacheInner,
        token: Arc<SessionToken>,
        now: SystemTime,
    ) -> CacheAddResult {
        if token.valid_to() <= now {
            return CacheAddResult::AlreadyExpired;
        }

        let mut result = CacheAddResult::Added;
        if inner.entries.len() >= self.capacity {
            if let Some(evicted) = inner.evict_soonest() {
                tracing::info!(
                    context = %evicted.context_id(),
                    generation = %evicted.key_generation(),
                    capacity = self.capacity,
                    "token cache full, evicting soonest-expiring token"
                );
                result = CacheAddResult::Evicted(evicted);
            }
        }
        inner.insert(token);
        result
    }

    /// Look up a live token by context and key generation.
    pub fn get(
        &self,
        context_id: &str,
        key_generation: &str,
        now: SystemTime,
    ) -> Option<Arc<SessionToken>> {
        let mut inner = self.lock();
        let key = (context_id.to_string(), key_generation.to_string());
        let expires = inner.entries.get(&key)?.expires;
        if expires <= now {
            inner.remove(&key);
            return None;
        }
        inner.entries.get(&key).map(|entry| Arc::clone(&entry.token))
    }

    /// Every live generation cached for a context.
    pub fn get_all(&self, context_id: &str, now: SystemTime) -> Vec<Arc<SessionToken>> {
        let mut inner = self.lock();
        inner.purge_expired(now);
        let Some(generations) = inner.generations.get(context_id) else {
            return Vec::new();
        };
        generations
            .iter()
            .filter_map(|generation| {
                inner.entries.get(&(context_id.to_string(), generation.clone()))
            })
            .map(|entry| Arc::clone(&entry.token))
            .collect()
    }

    /// Most recently cached live generation of a context.
    pub fn latest(&self, context_id: &str, now: SystemTime) -> Option<Arc<SessionToken>> {
        let mut inner = self.lock();
        inner.purge_expired(now);
        let generations = inner.generations.get(context_id)?;
        generations
            .iter()
            .filter_map(|generation| {
                inner.entries.get(&(context_id.to_string(), generation.clone()))
            })
            .max_by_key(|entry| entry.seq)
            .map(|entry| Arc::clone(&entry.token))
    }

    /// Change when an entry expires. Returns false if no such entry exists.
    ///
    /// Used to keep a superseded key generation alive for the rollover
    /// window only.
    pub fn update_expiration(
        &self,
        context_id: &str,
        key_generation: &str,
        expires: SystemTime,
    ) -> bool {
        let mut inner = self.lock();
        let key = (context_id.to_string(), key_generation.to_string());
        let Some(entry) = inner.entries.get_mut(&key) else {
            return false;
        };
        let old = (entry.expires, entry.seq);
        entry.expires = expires;
        let new = (entry.expires, entry.seq);

        inner.by_expiration.remove(&old);
        inner.by_expiration.insert(new, key);
        true
    }

    /// Remove one generation.
    pub fn remove(&self, context_id: &str, key_generation: &str) -> Option<Arc<SessionToken>> {
        self.lock().remove(&(context_id.to_string(), key_generation.to_string()))
    }

    /// Remove every generation of a context.
    pub fn remove_all(&self, context_id: &str) -> Vec<Arc<SessionToken>> {
        let mut inner = self.lock();
        let generations: Vec<String> = inner
            .generations
            .get(context_id)
            .map(|generations| generations.iter().cloned().collect())
            .unwrap_or_default();

        generations
            .into_iter()
            .filter_map(|generation| inner.remove(&(context_id.to_string(), generation)))
            .collect()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self, now: SystemTime) -> usize {
        self.lock().purge_expired(now)
    }

    /// Number of cached entries, including any not yet purged.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything.
    pub fn clear(&self) {
        *self.lock() = CacheInner::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use parley_crypto::SymmetricKey;

    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn token(context: &str, generation: &str, valid_to: u64) -> Arc<SessionToken> {
        Arc::new(
            SessionToken::new(
                context,
                generation,
                SymmetricKey::from_slice(&[9u8; 32]),
                at(0),
                at(valid_to),
                vec![],
            )
            .unwrap(),
        )
    }

    fn cache(capacity: usize) -> SecurityTokenCache {
        SecurityTokenCache::new(&TokenCacheConfig { capacity })
    }

    #[test]
    fn add_and_get() {
        let cache = cache(4);
        assert_eq!(cache.try_add(token("c", "g1", 100), at(1)), CacheAddResult::Added);

        assert!(cache.get("c", "g1", at(2)).is_some());
        assert!(cache.get("c", "g2", at(2)).is_none());
    }

    #[test]
    fn duplicate_rejected_but_replace_allowed() {
        let cache = cache(4);
        cache.try_add(token("c", "g1", 100), at(1));

        assert_eq!(cache.try_add(token("c", "g1", 200), at(1)), CacheAddResult::Duplicate);
        assert_eq!(cache.add_or_replace(token("c", "g1", 200), at(1)), CacheAddResult::Added);
        assert_eq!(cache.get("c", "g1", at(150)).unwrap().valid_to(), at(200));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn full_cache_evicts_soonest_expiring() {
        let cache = cache(2);
        cache.try_add(token("late", "g", 300), at(0));
        cache.try_add(token("soon", "g", 100), at(0));

        let result = cache.try_add(token("new", "g", 200), at(0));
        let CacheAddResult::Evicted(evicted) = result else {
            panic!("expected eviction, got {result:?}");
        };
        assert_eq!(evicted.context_id(), "soon");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = cache(4);
        cache.try_add(token("c", "g", 10), at(0));

        assert!(cache.get("c", "g", at(10)).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.try_add(token("d", "g", 10), at(10)), CacheAddResult::AlreadyExpired);
    }

    #[test]
    fn generations_coexist_and_remove_all_clears_context() {
        let cache = cache(8);
        cache.try_add(token("c", "g1", 100), at(0));
        cache.try_add(token("c", "g2", 100), at(0));
        cache.try_add(token("other", "g1", 100), at(0));

        assert_eq!(cache.get_all("c", at(1)).len(), 2);
        assert_eq!(cache.remove_all("c").len(), 2);
        assert!(cache.get_all("c", at(1)).is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn shortened_expiration_takes_effect() {
        let cache = cache(4);
        cache.try_add(token("c", "old", 1000), at(0));

        assert!(cache.update_expiration("c", "old", at(50)));
        assert!(cache.get("c", "old", at(49)).is_some());
        assert_eq!(cache.purge_expired(at(50)), 1);
        assert!(!cache.update_expiration("c", "old", at(60)));
    }

    #[test]
    fn latest_is_last_cached_live_generation() {
        let cache = cache(4);
        assert!(cache.latest("c", at(0)).is_none());

        cache.try_add(token("c", "g1", 100), at(0));
        cache.try_add(token("c", "g2", 100), at(0));
        assert!(cache.update_expiration("c", "g1", at(500)));
        assert_eq!(cache.latest("c", at(1)).unwrap().key_generation(), "g2");

        assert!(cache.update_expiration("c", "g2", at(10)));
        assert_eq!(cache.latest("c", at(10)).unwrap().key_generation(), "g1");
    }

    #[test]
    fn clear_empties_cache() {
        let cache = cache(4);
        cache.try_add(token("c", "g", 100), at(0));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.remove("c", "g").is_none());
    }
}
