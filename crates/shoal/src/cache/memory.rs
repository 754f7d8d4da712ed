//! In-memory cache store.
//!
//! Backs single-process deployments and tests. Expiry is lazy: entries are
//! judged against the injected clock on access and swept during scans.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;

use crate::clock::Clock;

use super::store::{CacheResult, CacheStore};

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// DashMap-backed [`CacheStore`].
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn is_live(&self, entry: &Entry) -> bool {
        match entry.expires_at {
            None => true,
            Some(at) => self.clock.now() < at,
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|ttl| self.clock.now() + TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX))
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) => {
                if self.is_live(&entry) {
                    return Ok(Some(entry.value.clone()));
                }
                true
            }
        };
        if expired {
            self.entries.remove_if(key, |_, entry| !self.is_live(entry));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = self.expiry(ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let expires_at = self.expiry(ttl);
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if self.is_live(occupied.get()) {
                    Ok(false)
                } else {
                    occupied.insert(Entry { value, expires_at });
                    Ok(true)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry { value, expires_at });
                Ok(true)
            }
        }
    }

    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if !self.is_live(&entry) {
            return Ok(None);
        }
        match entry.expires_at {
            None => Ok(None),
            Some(at) => Ok((at - self.clock.now()).to_std().ok()),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.entries.retain(|_, entry| self.is_live(entry));
        Ok(self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

/// Match `input` against `pattern`, where `*` matches any run of characters.
fn glob_match(pattern: &str, input: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == input;
    }
    let mut remainder = input;
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match remainder.strip_prefix(segment) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if i == last {
            return remainder.ends_with(segment);
        } else {
            match remainder.find(segment) {
                Some(pos) => remainder = &remainder[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::at(DateTime::UNIX_EPOCH);
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("shoal_timely_*", "shoal_timely_42"));
        assert!(glob_match("shoal_timely_*", "shoal_timely_"));
        assert!(!glob_match("shoal_timely_*", "shoal_economy"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact_not"));
        assert!(glob_match("a*_c", "a_b_c"));
        assert!(!glob_match("a*_c", "a_b_d"));
    }

    #[tokio::test]
    async fn set_get_delete() {
        let (store, _) = store();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let (store, clock) = store();
        store
            .set("k", b"v".to_vec(), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(59));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(TimeDelta::seconds(2));
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_if_absent_claims_once() {
        let (store, clock) = store();
        let ttl = Some(Duration::from_secs(30));
        assert!(store.set_if_absent("k", vec![1], ttl).await.unwrap());
        assert!(!store.set_if_absent("k", vec![2], ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(vec![1]));

        // An expired claim counts as absent.
        clock.advance(TimeDelta::seconds(31));
        assert!(store.set_if_absent("k", vec![3], ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(vec![3]));
    }

    #[tokio::test]
    async fn ttl_remaining_tracks_the_clock() {
        let (store, clock) = store();
        store
            .set("k", vec![], Some(Duration::from_secs(100)))
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(40));
        let remaining = store.ttl_remaining("k").await.unwrap().unwrap();
        assert_eq!(remaining, Duration::from_secs(60));

        store.set("p", vec![], None).await.unwrap();
        assert_eq!(store.ttl_remaining("p").await.unwrap(), None);
        assert_eq!(store.ttl_remaining("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_filters_and_sweeps() {
        let (store, clock) = store();
        store.set("ns_claim_1", vec![], None).await.unwrap();
        store
            .set("ns_claim_2", vec![], Some(Duration::from_secs(10)))
            .await
            .unwrap();
        store.set("ns_other_1", vec![], None).await.unwrap();

        clock.advance(TimeDelta::seconds(11));
        let mut keys = store.scan("ns_claim_*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["ns_claim_1".to_string()]);
    }
}
