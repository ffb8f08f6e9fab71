//! In-memory object storage.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::traits::*;

/// A write observed by a [`MemoryStore`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOp {
    pub bucket: String,
    pub key: String,
    pub cache_control: Option<String>,
    pub condition: PutCondition,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, String), StoredObject>,
    ops: Vec<StoreOp>,
    failing: HashSet<String>,
}

/// Object store held in process memory.
///
/// Versions are a per-store counter. A store built with
/// [`MemoryStore::unversioned`] returns no version identifiers, like a
/// bucket without versioning enabled.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    next_version: AtomicU64,
    versioned: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_version: AtomicU64::new(1),
            versioned: true,
        }
    }

    pub fn unversioned() -> Self {
        Self {
            versioned: false,
            ..Self::new()
        }
    }

    /// Make every put to `key` fail with a backend error.
    pub fn fail_puts_to(&self, key: &str) {
        self.lock().failing.insert(key.to_string());
    }

    /// Writes performed so far, including failed ones.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.lock().ops.clone()
    }

    /// Keys of successful and failed writes, in order.
    pub fn written_keys(&self) -> Vec<String> {
        self.lock().ops.iter().map(|op| op.key.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a panic while holding the lock cannot leave the map half-written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("injected failure writing {0}")]
struct InjectedFailure(String);

impl ObjectStore for MemoryStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, object: PutObject<'_>) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock();
        inner.ops.push(StoreOp {
            bucket: object.bucket.to_string(),
            key: object.key.to_string(),
            cache_control: object.cache_control.map(str::to_string),
            condition: object.condition.clone(),
        });

        if inner.failing.contains(object.key) {
            return Err(StoreError::backend(InjectedFailure(object.key.to_string())));
        }

        let id = (object.bucket.to_string(), object.key.to_string());
        let current = inner.objects.get(&id).map(|o| o.version.as_deref());
        let satisfied = match (&object.condition, current) {
            (PutCondition::Overwrite, _) => true,
            (PutCondition::CreateOnly, existing) => existing.is_none(),
            (PutCondition::IfMatch(expected), Some(Some(version))) => expected == version,
            (PutCondition::IfMatch(_), _) => false,
        };
        if !satisfied {
            return Err(StoreError::Conflict {
                bucket: id.0,
                key: id.1,
            });
        }

        let version = self
            .versioned
            .then(|| self.next_version.fetch_add(1, Ordering::Relaxed).to_string());

        inner.objects.insert(
            id,
            StoredObject {
                body: object.body.to_vec(),
                version: version.clone(),
                cache_control: object.cache_control.map(str::to_string),
            },
        );

        Ok(version)
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_increase() {
        let store = MemoryStore::new();
        let a = store.put(PutObject::new("b", "k", b"1")).unwrap();
        let b = store.put(PutObject::new("b", "k", b"2")).unwrap();
        assert_eq!(a.as_deref(), Some("1"));
        assert_eq!(b.as_deref(), Some("2"));
    }

    #[test]
    fn test_unversioned_returns_none() {
        let store = MemoryStore::unversioned();
        assert_eq!(store.put(PutObject::new("b", "k", b"1")).unwrap(), None);
        assert_eq!(store.get("b", "k").unwrap().unwrap().version, None);
    }

    #[test]
    fn test_create_only_and_injected_failure() {
        let store = MemoryStore::new();
        store.put(PutObject::new("b", "k", b"1").create_only()).unwrap();
        assert!(
            store
                .put(PutObject::new("b", "k", b"2").create_only())
                .unwrap_err()
                .is_conflict()
        );

        store.fail_puts_to("bad");
        let err = store.put(PutObject::new("b", "bad", b"")).unwrap_err();
        assert!(!err.is_conflict());
        assert_eq!(store.written_keys(), vec!["k", "k", "bad"]);
    }

    #[test]
    fn test_list_is_sorted_and_scoped() {
        let store = MemoryStore::new();
        store.put(PutObject::new("b", "history/2", b"")).unwrap();
        store.put(PutObject::new("b", "history/1", b"")).unwrap();
        store.put(PutObject::new("other", "history/3", b"")).unwrap();
        assert_eq!(store.list("b", "history/").unwrap(), vec!["history/1", "history/2"]);
    }

    #[test]
    fn test_if_match() {
        let store = MemoryStore::new();
        assert!(
            store
                .put(PutObject::new("b", "k", b"1").if_match("1"))
                .unwrap_err()
                .is_conflict()
        );

        let v1 = store.put(PutObject::new("b", "k", b"1")).unwrap().unwrap();
        let v2 = store.put(PutObject::new("b", "k", b"2").if_match(&v1)).unwrap().unwrap();
        assert!(
            store
                .put(PutObject::new("b", "k", b"3").if_match(&v1))
                .unwrap_err()
                .is_conflict()
        );
        assert_eq!(store.get("b", "k").unwrap().unwrap().version, Some(v2));
    }
}
