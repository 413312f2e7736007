use bytes::Bytes;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// The Store owns every key the server knows about: plain string values (with an optional
/// expiry) and hashes. Each of the two keyspaces sits behind its own read-write lock, so reads
/// run in parallel while a write serializes with everything else on the same keyspace.
///
/// Expiry is lazy: nothing sweeps expired entries, they are dropped the next time a read
/// finds them. The store is cheap to clone, clones share the same state.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        Self::default()
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

type Key = String;

pub type Strings = HashMap<Key, Entry>;
pub type Hashes = HashMap<Key, HashMap<String, Bytes>>;

#[derive(Default)]
pub struct InnerStore {
    strings: RwLock<Strings>,
    hashes: RwLock<Hashes>,
}

impl InnerStore {
    // A panic while holding a lock leaves the maps in a consistent state (every mutation is a
    // single insert or remove), so poisoning is ignored.

    pub fn strings(&self) -> RwLockReadGuard<'_, Strings> {
        self.strings.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn strings_mut(&self) -> RwLockWriteGuard<'_, Strings> {
        self.strings.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hashes(&self) -> RwLockReadGuard<'_, Hashes> {
        self.hashes.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hashes_mut(&self) -> RwLockWriteGuard<'_, Hashes> {
        self.hashes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live value of `key`, removing it if it has expired.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = now_millis();

        {
            let strings = self.strings();
            match strings.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.data.clone()),
                Some(_) => {}
            }
        }

        // The read lock can't be upgraded in place. Someone may have overwritten the key in
        // between, so check again under the write lock.
        let mut strings = self.strings_mut();
        let entry = strings.get(key)?;
        if !entry.is_expired(now) {
            return Some(entry.data.clone());
        }

        strings.remove(key);
        None
    }

    /// Number of string keys physically present, expired ones included.
    pub fn len(&self) -> usize {
        self.strings().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fields in the hash `name`, `None` if the hash was never created.
    pub fn hash_len(&self, name: &str) -> Option<usize> {
        self.hashes().get(name).map(HashMap::len)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub data: Bytes,
    /// Milliseconds since the Unix epoch. `None`, zero or negative means no expiry.
    pub expires_at: Option<i64>,
}

impl Entry {
    pub fn new(data: Bytes) -> Entry {
        Entry {
            data,
            expires_at: None,
        }
    }

    pub fn with_expiry(data: Bytes, expires_at: Option<i64>) -> Entry {
        Entry { data, expires_at }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at > 0 && at <= now)
    }
}

/// Current wall clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
