//! Cacheability rules and cache key derivation for rendered pages

use derive_more::Display;
use http::Uri;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

/// Namespace every HTML cache key starts with
pub const CACHE_KEY_NAMESPACE: &str = "html_cache:";

/// Prefix of the lock guarding a single cache key
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Query parameter the renderer adds to partial (sub-tree) fetches
pub const PARTIAL_RENDER_MARKER: &str = "_rsc";

/// Default capacity of the key memo
pub const DEFAULT_MEMO_CAPACITY: usize = 1000;

/// Key under which a rendered page is stored
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the distributed lock guarding writes to this entry
    pub fn lock_key(&self) -> String {
        format!("{LOCK_KEY_PREFIX}{}", self.0)
    }
}

/// Fixed-capacity map with first-in-first-out eviction.
///
/// Used purely as a computation cache: dropping entries never changes results.
#[derive(Debug)]
pub struct BoundedMemo<K, V> {
    capacity: usize,
    inner: Mutex<MemoInner<K, V>>,
}

#[derive(Debug)]
struct MemoInner<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> BoundedMemo<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(MemoInner {
                entries: HashMap::with_capacity(capacity.max(1)),
                order: VecDeque::with_capacity(capacity.max(1)),
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        if inner.entries.insert(key.clone(), value).is_some() {
            return;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

/// Decides which requests may touch the HTML cache and under which key
#[derive(Debug)]
pub struct CacheKeyPolicy {
    cacheable_paths: HashSet<String>,
    memo: BoundedMemo<(String, String), CacheKey>,
}

impl CacheKeyPolicy {
    pub fn new<I, S>(cacheable_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_memo_capacity(cacheable_paths, DEFAULT_MEMO_CAPACITY)
    }

    pub fn with_memo_capacity<I, S>(cacheable_paths: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            cacheable_paths: cacheable_paths
                .into_iter()
                .map(|path| normalize_path(path.as_ref()).to_string())
                .collect(),
            memo: BoundedMemo::new(capacity),
        }
    }

    /// Allow-listed path and not a partial-render fetch
    pub fn is_cacheable(&self, uri: &Uri) -> bool {
        self.is_cacheable_path(uri.path()) && !is_partial_render(uri)
    }

    pub fn is_cacheable_path(&self, path: &str) -> bool {
        self.cacheable_paths.contains(normalize_path(path))
    }

    pub fn derive_key(&self, host: &str, uri: &Uri) -> CacheKey {
        self.derive_key_for_path(host, uri.path())
    }

    /// Key for a bare path; anything from `?` on is ignored
    pub fn derive_key_for_path(&self, host: &str, path: &str) -> CacheKey {
        let path = path.split('?').next().unwrap_or(path);
        let memo_key = (host.to_string(), path.to_string());
        if let Some(key) = self.memo.get(&memo_key) {
            return key;
        }

        let key = CacheKey(format!(
            "{CACHE_KEY_NAMESPACE}{}{}",
            host.to_ascii_lowercase(),
            normalize_path(path)
        ));
        self.memo.insert(memo_key, key.clone());
        key
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    pub fn clear_memo(&self) {
        self.memo.clear();
    }
}

/// Strip trailing slashes, keeping the root as `/`
pub fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Whether the query carries the partial-render marker
pub fn is_partial_render(uri: &Uri) -> bool {
    uri.query().is_some_and(|query| {
        query
            .split('&')
            .any(|pair| pair.split('=').next() == Some(PARTIAL_RENDER_MARKER))
    })
}
