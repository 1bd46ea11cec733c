use super::{Storage, StoreDriver};
use crate::core::{DbError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Bits of a timestamp reserved for the logical counter
const LOGICAL_BITS: u32 = 18;

/// In-memory backend with a local timestamp oracle.
///
/// Timestamps combine wall-clock milliseconds with a logical counter, the
/// same layout a distributed oracle hands out. Failure injection lets tests
/// exercise the timestamp worker's degraded path.
#[derive(Debug)]
pub struct MockStore {
    uuid: String,
    last_ts: AtomicU64,
    requests: AtomicU64,
    fail_next: AtomicU64,
    unavailable: AtomicBool,
    closed: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            last_ts: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            fail_next: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of timestamp requests received so far, failed ones included
    pub fn timestamp_requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Makes every timestamp request fail until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` timestamp requests fail
    pub fn fail_next(&self, count: u64) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_timestamp(&self) -> u64 {
        let physical = (Utc::now().timestamp_millis().max(0) as u64) << LOGICAL_BITS;
        let mut prev = self.last_ts.load(Ordering::SeqCst);
        loop {
            let next = physical.max(prev + 1);
            match self
                .last_ts
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MockStore {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    async fn current_timestamp(&self) -> Result<u64> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::ExecutionError("store is closed".into()));
        }
        if self.unavailable.load(Ordering::SeqCst) || self.take_injected_failure() {
            return Err(DbError::Backend("timestamp oracle unavailable".into()));
        }

        Ok(self.next_timestamp())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(uuid = %self.uuid, "mock store closed");
        }
        Ok(())
    }
}

/// Driver behind the `memory://` scheme; every open yields a fresh store
#[derive(Debug, Default, Clone, Copy)]
pub struct MockStoreDriver;

#[async_trait]
impl StoreDriver for MockStoreDriver {
    async fn open(&self, path: &str) -> Result<Arc<dyn Storage>> {
        debug!(%path, "opening mock store");
        Ok(Arc::new(MockStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let store = MockStore::new();
        let mut prev = 0;
        for _ in 0..1000 {
            let ts = store.current_timestamp().await.unwrap();
            assert!(ts > prev);
            prev = ts;
        }
        assert_eq!(store.timestamp_requests(), 1000);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MockStore::new();
        store.fail_next(2);
        assert!(store.current_timestamp().await.is_err());
        assert!(store.current_timestamp().await.is_err());
        assert!(store.current_timestamp().await.is_ok());

        store.set_unavailable(true);
        assert!(store.current_timestamp().await.is_err());
        store.set_unavailable(false);
        assert!(store.current_timestamp().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_requests() {
        let store = MockStore::new();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(store.is_closed());
        assert!(store.current_timestamp().await.is_err());
    }
}
