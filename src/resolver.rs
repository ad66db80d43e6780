//! Accepts a session UUID or name on every session-scoped request and
//! resolves it to the canonical UUID.
//!
//! A syntactically valid UUID is returned as-is without consulting the
//! store. Names go through a bounded TTL cache. Invalidation is TTL-only:
//! names cannot be renamed and deletion is rare, so a stale hit yields at
//! worst a not-found downstream.

use crate::error::{Result, ValidationError};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long a cached name→id mapping stays valid.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Upper bound on cached names.
const CACHE_CAP: usize = 10_000;

/// Lookup grammar is wider than the creation grammar; the store decides
/// whether the name exists.
const LOOKUP_NAME_MAX: usize = 100;

struct CachedId {
    id: Uuid,
    inserted_at: Instant,
}

pub struct SessionResolver {
    store: Store,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedId>>,
    last_sweep: Mutex<Instant>,
}

impl SessionResolver {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Resolve a free-form identifier to a session id.
    pub async fn resolve(&self, identifier: &str) -> Result<Uuid> {
        if let Ok(id) = Uuid::parse_str(identifier) {
            return Ok(id);
        }
        if !lookup_name(identifier) {
            return Err(ValidationError::InvalidIdentifier.into());
        }
        self.maybe_sweep();
        if let Some(id) = self.cached(identifier) {
            return Ok(id);
        }
        let session = self.store.get_by_name(identifier).await?;
        self.insert(identifier, session.id);
        Ok(session.id)
    }

    fn cached(&self, name: &str) -> Option<Uuid> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .get(name)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.id)
    }

    fn insert(&self, name: &str, id: Uuid) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= CACHE_CAP {
            let ttl = self.ttl;
            cache.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        }
        if cache.len() < CACHE_CAP {
            cache.insert(
                name.to_string(),
                CachedId {
                    id,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Drop expired entries at most once per TTL interval.
    fn maybe_sweep(&self) {
        let mut last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
        if last.elapsed() < self.ttl {
            return;
        }
        *last = Instant::now();
        drop(last);
        let ttl = self.ttl;
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.read().unwrap().len()
    }
}

fn lookup_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= LOOKUP_NAME_MAX
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::MemoryStore;
    use crate::types::Session;
    use std::sync::Arc;

    fn resolver_with(ttl: Duration) -> (SessionResolver, Store) {
        let store: Store = Arc::new(MemoryStore::new());
        (SessionResolver::new(Arc::clone(&store), ttl), store)
    }

    #[tokio::test]
    async fn uuid_never_touches_store() {
        let (resolver, _store) = resolver_with(DEFAULT_TTL);
        // Nothing exists in the store; a store consult would fail.
        let id = Uuid::new_v4();
        let resolved = resolver.resolve(&id.to_string()).await.unwrap();
        assert_eq!(resolved, id);
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn name_resolves_and_caches() {
        let (resolver, store) = resolver_with(DEFAULT_TTL);
        let session = Session::new("alpha", None);
        store.create(&session).await.unwrap();

        assert_eq!(resolver.resolve("alpha").await.unwrap(), session.id);
        // Tombstone the row: a second resolve must come from the cache.
        store.set_active(session.id, false).await.unwrap();
        assert_eq!(resolver.resolve("alpha").await.unwrap(), session.id);
    }

    #[tokio::test]
    async fn expired_entry_falls_back_to_store() {
        let (resolver, store) = resolver_with(Duration::ZERO);
        let session = Session::new("alpha", None);
        store.create(&session).await.unwrap();

        assert_eq!(resolver.resolve("alpha").await.unwrap(), session.id);
        store.set_active(session.id, false).await.unwrap();
        let err = resolver.resolve("alpha").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn malformed_identifier_rejected() {
        let (resolver, _store) = resolver_with(DEFAULT_TTL);
        for bad in ["", "has space", "dots.bad", &"x".repeat(101)] {
            let err = resolver.resolve(bad).await.unwrap_err();
            assert!(
                matches!(
                    err,
                    Error::Validation(ValidationError::InvalidIdentifier)
                ),
                "{bad:?} should be invalid"
            );
        }
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let (resolver, _store) = resolver_with(DEFAULT_TTL);
        let err = resolver.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
