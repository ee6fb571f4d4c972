//! Bounded pool for CPU-bound work.

use resilience::{ConcurrencyGate, ErrorKind, GateStats};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool closed")]
    Closed,
    #[error("worker task failed: {0}")]
    Join(String),
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Runs blocking closures on tokio's blocking threads, at most `size` at a
/// time, so image work never stalls the I/O workers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    gate: ConcurrencyGate,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            gate: ConcurrencyGate::new(size),
        }
    }

    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.gate.acquire().await.map_err(|_| PoolError::Closed)?;
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| PoolError::Join(e.to_string()))
    }

    pub fn stats(&self) -> GateStats {
        self.gate.stats()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn at_most_size_jobs_run_together() {
        let pool = WorkerPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..12)
            .map(|_| {
                let pool = pool.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    pool.run(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                })
            })
            .collect();

        for job in jobs {
            job.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.stats().total_acquired, 12);
    }

    #[tokio::test]
    async fn panicking_job_is_an_error() {
        let pool = WorkerPool::new(1);
        let outcome = pool.run(|| panic!("bad page")).await;
        assert!(matches!(outcome, Err(PoolError::Join(_))));
        // The slot came back.
        assert_eq!(pool.run(|| 7).await.unwrap(), 7);
    }
}
