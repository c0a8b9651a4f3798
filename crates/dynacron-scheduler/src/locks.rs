use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::SourceRef;

/// Per-job mutual exclusion.
///
/// Resolution and dispatch both read a job row, decide, then write it back.
/// Holding the job's guard across that sequence keeps two workers from
/// dispatching the same due window twice.
#[derive(Clone, Default)]
pub struct JobLocks {
    inner: Arc<DashMap<SourceRef, Arc<Mutex<()>>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, source: &SourceRef) -> OwnedMutexGuard<()> {
        // clone the Arc out so the map shard is not held across the await
        let lock = Arc::clone(&self.inner.entry(source.clone()).or_default());
        lock.lock_owned().await
    }

    /// Drop the lock of a deleted job.
    pub fn forget(&self, source: &SourceRef) {
        self.inner.remove(source);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
