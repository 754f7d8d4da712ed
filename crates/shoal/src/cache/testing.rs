//! Cache fakes shared by unit tests.

use std::time::Duration;

use async_trait::async_trait;

use super::store::{CacheError, CacheResult, CacheStore};

/// A store whose every operation fails as unavailable.
pub(crate) struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Err(CacheError::Unavailable("nope".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> CacheResult<()> {
        Err(CacheError::Unavailable("nope".into()))
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: Vec<u8>,
        _ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        Err(CacheError::Unavailable("nope".into()))
    }

    async fn ttl_remaining(&self, _key: &str) -> CacheResult<Option<Duration>> {
        Err(CacheError::Unavailable("nope".into()))
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("nope".into()))
    }

    async fn scan(&self, _pattern: &str) -> CacheResult<Vec<String>> {
        Err(CacheError::Unavailable("nope".into()))
    }
}
