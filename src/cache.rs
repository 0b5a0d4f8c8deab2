use {
    crate::solana_rpc::RpcError,
    lru::LruCache,
    solana_sdk::clock::Slot,
    std::{
        future::Future,
        hash::Hash,
        num::NonZeroUsize,
        sync::Mutex,
        time::Duration,
    },
    tokio::time::Instant,
    tracing::warn,
};

pub const DEFAULT_STORE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(capacity) => capacity,
    None => panic!("capacity must be non-zero"),
};

/// Stale values are still served on fetch failure while younger than `ttl * STALE_GRACE_FACTOR`.
pub const STALE_GRACE_FACTOR: u32 = 3;

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub captured_at: Instant,
    pub slot: Option<Slot>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, slot: Option<Slot>) -> Self {
        Self {
            value,
            captured_at: Instant::now(),
            slot,
        }
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }

    pub fn is_within_grace(&self, ttl: Duration) -> bool {
        self.age() < ttl.saturating_mul(STALE_GRACE_FACTOR)
    }
}

/// How a value was obtained by [`EntryStore::get_or_fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    Cached,
    Live,
    Stale,
}

///
/// TTL-keyed map shared by every caller of a cache.
///
/// Entries are snapshots of chain state, so concurrent stores for the same key
/// resolve as last writer wins. The map is bounded and evicts the least
/// recently used key once `capacity` is reached.
///
#[derive(Debug)]
pub struct EntryStore<K: Hash + Eq, V> {
    name: &'static str,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
}

impl<K, V> EntryStore<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Display,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_STORE_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: NonZeroUsize) -> Self {
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the value if it was captured less than `ttl` ago. Never fetches.
    pub fn get(&self, key: &K, ttl: Duration) -> Option<V> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries
            .get(key)
            .filter(|entry| entry.is_fresh(ttl))
            .map(|entry| entry.value.clone())
    }

    /// Returns the raw entry regardless of age.
    pub fn get_entry(&self, key: &K) -> Option<CacheEntry<V>> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V, slot: Option<Slot>) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.put(key, CacheEntry::new(value, slot));
    }

    pub fn invalidate(&self, key: &K) -> bool {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.pop(key).is_some()
    }

    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serves a stale value for `key` if the failure is recoverable, `fallback` is on
    /// and the entry is still inside the grace window. A missing account drops the entry.
    fn recover(&self, key: &K, ttl: Duration, fallback: bool, error: &RpcError) -> Option<V> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        if error.is_account_not_found() {
            entries.pop(key);
            return None;
        }
        if !fallback {
            return None;
        }
        let entry = entries.get(key).filter(|entry| entry.is_within_grace(ttl))?;
        warn!(
            cache = self.name,
            key = %key,
            age_ms = entry.age().as_millis() as u64,
            error = %error,
            "live fetch failed, serving stale value"
        );
        Some(entry.value.clone())
    }

    ///
    /// Returns a fresh cached value or calls `fetcher` and stores its result.
    ///
    /// With `fallback` on, a fetch failure returns a stale entry younger than
    /// `ttl * 3` instead of the error.
    ///
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &K,
        ttl: Duration,
        fallback: bool,
        fetcher: F,
    ) -> Result<(V, Served), RpcError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(V, Option<Slot>), RpcError>>,
    {
        if let Some(value) = self.get(key, ttl) {
            return Ok((value, Served::Cached));
        }

        match fetcher().await {
            Ok((value, slot)) => {
                self.insert(key.clone(), value.clone(), slot);
                Ok((value, Served::Live))
            }
            Err(error) => match self.recover(key, ttl, fallback, &error) {
                Some(value) => Ok((value, Served::Stale)),
                None => Err(error),
            },
        }
    }

    ///
    /// Serves fresh keys from the store and fetches the rest with a single call to
    /// `batch_fetcher`, preserving the order of `keys`.
    ///
    /// `batch_fetcher` receives the missing keys and must answer them in the same
    /// order; `None` marks an absent value, which is not cached. When the batch
    /// call fails every missing key goes through [`Self::get_or_fetch`] with
    /// `fetcher`.
    ///
    pub async fn get_batch<B, BFut, F, Fut>(
        &self,
        keys: &[K],
        ttl: Duration,
        fallback: bool,
        batch_fetcher: B,
        fetcher: F,
    ) -> Result<Vec<Option<(V, Served)>>, RpcError>
    where
        B: FnOnce(Vec<K>) -> BFut,
        BFut: Future<Output = Result<(Vec<Option<V>>, Option<Slot>), RpcError>>,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<(V, Option<Slot>), RpcError>>,
    {
        let mut values: Vec<Option<(V, Served)>> = Vec::with_capacity(keys.len());
        let mut missing: Vec<(usize, K)> = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let cached = self.get(key, ttl);
            if cached.is_none() {
                missing.push((index, key.clone()));
            }
            values.push(cached.map(|value| (value, Served::Cached)));
        }

        if missing.is_empty() {
            return Ok(values);
        }

        let missing_keys = missing.iter().map(|(_, key)| key.clone()).collect();
        match batch_fetcher(missing_keys).await {
            Ok((fetched, slot)) if fetched.len() == missing.len() => {
                for ((index, key), value) in missing.into_iter().zip(fetched) {
                    match &value {
                        Some(value) => self.insert(key, value.clone(), slot),
                        None => {
                            self.invalidate(&key);
                        }
                    }
                    values[index] = value.map(|value| (value, Served::Live));
                }
                Ok(values)
            }
            result => {
                match result {
                    Ok((fetched, _)) => warn!(
                        cache = self.name,
                        expected = missing.len(),
                        received = fetched.len(),
                        "batch fetch returned mismatched length, falling back to single fetches"
                    ),
                    Err(error) => warn!(
                        cache = self.name,
                        error = %error,
                        "batch fetch failed, falling back to single fetches"
                    ),
                }
                for (index, key) in missing {
                    let fetch = || fetcher(key.clone());
                    values[index] = match self.get_or_fetch(&key, ttl, fallback, fetch).await {
                        Ok(served) => Some(served),
                        Err(error) if error.is_account_not_found() => None,
                        Err(error) => return Err(error),
                    };
                }
                Ok(values)
            }
        }
    }
}
