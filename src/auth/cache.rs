//! Credential cache with TTL expiry
//!
//! Accepted credentials are cached under `service:sha256(credential)` so the
//! raw secret is never held as a map key. Expiry compares against the instant
//! captured when the entry was written; expired entries are evicted lazily on
//! read.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::validator::{ApiKeyValidator, CredentialCheck, TokenValidator};
use crate::Result;

/// A cached check with its write time
#[derive(Debug)]
struct CachedCredential {
    check: CredentialCheck,
    cached_at: Instant,
}

impl CachedCredential {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Thread-safe TTL cache of accepted credentials
#[derive(Debug)]
pub struct CredentialCache {
    entries: DashMap<String, CachedCredential>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CredentialCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Cache key for a credential
    #[must_use]
    pub fn build_key(service: &str, credential: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(credential.as_bytes());
        format!("{service}:{}", hex::encode(hasher.finalize()))
    }

    /// Cached check, if present and not expired
    pub fn get(&self, key: &str) -> Option<CredentialCheck> {
        let Some(entry) = self.entries.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired(self.ttl) {
            drop(entry);
            self.evict_if_expired(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.check.clone())
        }
    }

    /// Remove `key` if it is still expired. A concurrent `set` may have
    /// refreshed the entry since it was read, so expiry is re-checked under
    /// the shard lock.
    fn evict_if_expired(&self, key: &str) -> bool {
        let evicted = self.entries.remove_if(key, |_, entry| entry.is_expired(self.ttl)).is_some();
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Store an accepted check. Rejections are never cached.
    pub fn set(&self, key: &str, check: &CredentialCheck) {
        if !check.valid {
            return;
        }
        self.entries.insert(
            key.to_string(),
            CachedCredential {
                check: check.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Number of entries, including expired ones not yet evicted
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache hits so far
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Expired entries evicted so far
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// API key validator decorated with a credential cache
#[derive(Debug)]
pub struct CachingKeyValidator {
    inner: Arc<dyn ApiKeyValidator>,
    cache: CredentialCache,
}

impl CachingKeyValidator {
    /// Wrap `inner` with a cache of the given TTL
    #[must_use]
    pub fn new(inner: Arc<dyn ApiKeyValidator>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: CredentialCache::new(ttl),
        }
    }

    /// Underlying cache
    #[must_use]
    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }
}

#[async_trait]
impl ApiKeyValidator for CachingKeyValidator {
    async fn validate(&self, key: &str, service: &str) -> Result<CredentialCheck> {
        let cache_key = CredentialCache::build_key(service, key);
        if let Some(check) = self.cache.get(&cache_key) {
            return Ok(check);
        }
        let check = self.inner.validate(key, service).await?;
        self.cache.set(&cache_key, &check);
        Ok(check)
    }
}

/// Token validator decorated with a credential cache
#[derive(Debug)]
pub struct CachingTokenValidator {
    inner: Arc<dyn TokenValidator>,
    cache: CredentialCache,
}

impl CachingTokenValidator {
    /// Wrap `inner` with a cache of the given TTL
    #[must_use]
    pub fn new(inner: Arc<dyn TokenValidator>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: CredentialCache::new(ttl),
        }
    }

    /// Underlying cache
    #[must_use]
    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }
}

#[async_trait]
impl TokenValidator for CachingTokenValidator {
    async fn validate(&self, token: &str) -> Result<CredentialCheck> {
        let cache_key = CredentialCache::build_key("oauth", token);
        if let Some(check) = self.cache.get(&cache_key) {
            return Ok(check);
        }
        let check = self.inner.validate(token).await?;
        self.cache.set(&cache_key, &check);
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingValidator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApiKeyValidator for CountingValidator {
        async fn validate(&self, key: &str, service: &str) -> Result<CredentialCheck> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if key.starts_with("good") {
                CredentialCheck::accepted(service)
            } else {
                CredentialCheck::rejected("nope")
            })
        }
    }

    #[test]
    fn key_hides_credential() {
        let key = CredentialCache::build_key("newsletter", "secret-key");
        assert!(key.starts_with("newsletter:"));
        assert!(!key.contains("secret-key"));
        assert_eq!(key, CredentialCache::build_key("newsletter", "secret-key"));
        assert_ne!(key, CredentialCache::build_key("other", "secret-key"));
    }

    #[test]
    fn expired_entries_evicted_on_read() {
        let cache = CredentialCache::new(Duration::ZERO);
        cache.set("k", &CredentialCheck::accepted("svc"));
        std::thread::sleep(Duration::from_millis(2));

        assert!(cache.get("k").is_none());
        assert_eq!(cache.evictions(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_spares_a_refreshed_entry() {
        let cache = CredentialCache::new(Duration::from_secs(60));
        let stale = Instant::now().checked_sub(Duration::from_secs(120)).unwrap();
        cache.entries.insert(
            "k".to_string(),
            CachedCredential {
                check: CredentialCheck::accepted("svc"),
                cached_at: stale,
            },
        );

        // Another request re-validates and rewrites the entry before eviction runs
        cache.set("k", &CredentialCheck::accepted("svc"));
        assert!(!cache.evict_if_expired("k"));
        assert_eq!(cache.evictions(), 0);
        assert_eq!(cache.get("k"), Some(CredentialCheck::accepted("svc")));

        cache.entries.insert(
            "k".to_string(),
            CachedCredential {
                check: CredentialCheck::accepted("svc"),
                cached_at: stale,
            },
        );
        assert!(cache.evict_if_expired("k"));
        assert!(cache.is_empty());
    }

    #[test]
    fn rejections_not_cached() {
        let cache = CredentialCache::new(Duration::from_secs(300));
        cache.set("k", &CredentialCheck::rejected("bad"));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[tokio::test]
    async fn caching_validator_skips_inner_on_hit() {
        let inner = Arc::new(CountingValidator::default());
        let v = CachingKeyValidator::new(inner.clone(), Duration::from_secs(300));

        assert!(v.validate("good-key", "svc").await.unwrap().valid);
        assert!(v.validate("good-key", "svc").await.unwrap().valid);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(v.cache().hits(), 1);

        // Same key, different service is a separate entry
        v.validate("good-key", "other").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        // Rejections always go to the inner validator
        v.validate("bad-key", "svc").await.unwrap();
        v.validate("bad-key", "svc").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
    }
}
