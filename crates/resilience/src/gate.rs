//! Bounded in-flight concurrency for upstream calls.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The gate's semaphore was closed; no new permits will be handed out.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("concurrency gate closed")]
pub struct GateClosed;

/// Counting semaphore with in-flight instrumentation.
///
/// Cloning shares the same permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<GateCounters>,
}

#[derive(Debug, Default)]
struct GateCounters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicU64,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(GateCounters::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free slot. The slot is returned when the permit drops,
    /// including on error and cancellation paths.
    pub async fn acquire(&self) -> Result<GatePermit, GateClosed> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)?;
        Ok(self.track(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.track(permit))
    }

    /// Run `fut` while holding a slot.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, GateClosed>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(fut.await)
    }

    /// Stop handing out permits. Waiters receive [`GateClosed`].
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> GatePermit {
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        GatePermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        }
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.capacity,
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak.load(Ordering::SeqCst),
            total_acquired: self.counters.total.load(Ordering::Relaxed),
        }
    }
}

/// RAII slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<GateCounters>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct GateStats {
    pub capacity: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub total_acquired: u64,
}
