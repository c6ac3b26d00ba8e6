//! In-flight job tracking shared by a dispatcher and its workers.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use queue_core::JobId;

/// Bounds how many jobs one tier runs at once.
///
/// The dispatcher acquires a slot per claimed job and the worker releases it
/// when the job is finished, so the next poll sees capacity freed mid-cycle.
/// Clones share the same set.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<LimiterInner>,
}

#[derive(Debug)]
struct LimiterInner {
    limit: usize,
    in_flight: Mutex<HashSet<JobId>>,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                limit,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.inner.limit.saturating_sub(self.in_flight())
    }

    /// Take a slot for `id`. Fails when full or when `id` already holds one.
    pub fn try_acquire(&self, id: JobId) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight.len() >= self.inner.limit {
            return false;
        }
        in_flight.insert(id)
    }

    /// Give back the slot held by `id`.
    pub fn release(&self, id: JobId) -> bool {
        self.inner.in_flight.lock().remove(&id)
    }

    pub fn is_idle(&self) -> bool {
        self.inner.in_flight.lock().is_empty()
    }

    /// Ids currently holding a slot.
    pub fn in_flight_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.inner.in_flight.lock().iter().copied().collect();
        ids.sort();
        ids
    }
}
