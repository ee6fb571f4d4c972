//! Lock-serialized face verification of a staged probe image.
//!
//! One verification per employee runs at a time across every instance
//! sharing the store. The coordinator walks
//! `Idle -> LockPending -> LockHeld -> FetchPending -> Verifying -> Cleanup -> Done`
//! and leaves through `Failed(kind)` from any stage. The lock is released on
//! every exit.

use crate::face::{FaceBackendError, FaceMatch, FaceVerifier, VerificationProfile, VerificationResult};
use crate::storage::{Storage, StorageError};
use cache::{DistributedLock, ResourceCache, StoreError};
use resilience::ErrorKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    Idle,
    LockPending,
    LockHeld,
    FetchPending,
    Verifying,
    Cleanup,
    Done,
    Failed(ErrorKind),
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("employee id must not be empty")]
    InvalidEmployeeId,
    #[error("another verification for {emp_id} is in progress")]
    Busy { emp_id: String },
    #[error("no staged image for {emp_id}")]
    NotStaged { emp_id: String },
    #[error("no reference image for {emp_id}")]
    ReferenceMissing { emp_id: String },
    #[error("cache fetch exceeded {0:?}")]
    FetchTimeout(Duration),
    #[error("verification exceeded {0:?}")]
    VerificationTimeout(Duration),
    #[error("no face detected")]
    NoFaceDetected,
    #[error(transparent)]
    Backend(FaceBackendError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(StorageError),
}

impl VerificationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VerificationError::InvalidEmployeeId | VerificationError::NoFaceDetected => {
                ErrorKind::InvalidInput
            }
            VerificationError::Busy { .. } => ErrorKind::ResourceBusy,
            VerificationError::NotStaged { .. } | VerificationError::ReferenceMissing { .. } => {
                ErrorKind::NotFound
            }
            VerificationError::FetchTimeout(_) | VerificationError::VerificationTimeout(_) => {
                ErrorKind::UpstreamTimeout
            }
            VerificationError::Backend(e) => e.kind(),
            VerificationError::Store(e) => e.kind(),
            VerificationError::Storage(e) => e.kind(),
        }
    }
}

impl From<FaceBackendError> for VerificationError {
    fn from(err: FaceBackendError) -> Self {
        match err {
            FaceBackendError::NoFaceDetected => VerificationError::NoFaceDetected,
            other => VerificationError::Backend(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Cache key prefix for staged probes; the employee id is appended.
    pub key_prefix: String,
    pub lock_attempts: u32,
    #[serde(with = "resilience::serde_millis")]
    pub lock_retry_delay: Duration,
    #[serde(with = "resilience::serde_millis")]
    pub fetch_timeout: Duration,
    /// Covers the reference lookup and the backend call together.
    #[serde(with = "resilience::serde_millis")]
    pub verification_timeout: Duration,
    /// Budget for the inline cache delete before it is deferred.
    #[serde(with = "resilience::serde_millis")]
    pub delete_timeout: Duration,
    pub profile: VerificationProfile,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            key_prefix: "face:verify:".to_string(),
            lock_attempts: 3,
            lock_retry_delay: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(5),
            verification_timeout: Duration::from_secs(30),
            delete_timeout: Duration::from_secs(1),
            profile: VerificationProfile::default(),
        }
    }
}

impl VerificationConfig {
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = timeout;
        self
    }

    pub fn with_lock_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.lock_attempts = attempts;
        self.lock_retry_delay = delay;
        self
    }

    pub fn with_profile(mut self, profile: VerificationProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Longest time one verification can hold the lock: fetch, verify and
    /// the inline delete. The lock TTL must be longer than this.
    pub fn critical_section_budget(&self) -> Duration {
        self.fetch_timeout + self.verification_timeout + self.delete_timeout
    }
}

struct StageTrace<'a> {
    emp_id: &'a str,
    stages: Vec<VerificationStage>,
}

impl<'a> StageTrace<'a> {
    fn new(emp_id: &'a str) -> Self {
        Self {
            emp_id,
            stages: vec![VerificationStage::Idle],
        }
    }

    fn enter(&mut self, stage: VerificationStage) {
        tracing::debug!(emp_id = self.emp_id, ?stage, "verification stage");
        self.stages.push(stage);
    }
}

#[derive(Clone)]
pub struct VerificationCoordinator {
    lock: DistributedLock,
    cache: ResourceCache,
    storage: Storage,
    verifier: Arc<dyn FaceVerifier>,
    config: VerificationConfig,
}

impl VerificationCoordinator {
    pub fn new(
        lock: DistributedLock,
        cache: ResourceCache,
        storage: Storage,
        verifier: Arc<dyn FaceVerifier>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            lock,
            cache,
            storage,
            verifier,
            config,
        }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Cache key a producer must stage the probe image under.
    pub fn staging_key(&self, emp_id: &str) -> String {
        format!("{}{emp_id}", self.config.key_prefix)
    }

    /// Store a probe image for a later [`verify`](Self::verify).
    pub async fn stage(&self, emp_id: &str, image: &[u8], ttl: Option<Duration>) -> bool {
        self.cache.save(&self.staging_key(emp_id), image, ttl).await
    }

    pub async fn verify(&self, emp_id: &str) -> Result<VerificationResult, VerificationError> {
        self.verify_traced(emp_id).await.0
    }

    /// Like [`verify`](Self::verify), also returning every stage entered.
    pub async fn verify_traced(
        &self,
        emp_id: &str,
    ) -> (
        Result<VerificationResult, VerificationError>,
        Vec<VerificationStage>,
    ) {
        let mut trace = StageTrace::new(emp_id);
        let outcome = self.drive(emp_id, &mut trace).await;
        match &outcome {
            Ok(_) => trace.enter(VerificationStage::Done),
            Err(err) => {
                tracing::warn!(emp_id, error = %err, kind = %err.kind(), "verification failed");
                trace.enter(VerificationStage::Failed(err.kind()));
            }
        }
        (outcome, trace.stages)
    }

    async fn drive(
        &self,
        emp_id: &str,
        trace: &mut StageTrace<'_>,
    ) -> Result<VerificationResult, VerificationError> {
        if emp_id.trim().is_empty() {
            return Err(VerificationError::InvalidEmployeeId);
        }
        let key = self.staging_key(emp_id);

        trace.enter(VerificationStage::LockPending);
        let guard = self
            .lock
            .lock(&key, self.config.lock_attempts, self.config.lock_retry_delay)
            .await?
            .ok_or_else(|| VerificationError::Busy {
                emp_id: emp_id.to_string(),
            })?;
        trace.enter(VerificationStage::LockHeld);

        let outcome = self.run_locked(emp_id, &key, trace).await;
        guard.release().await;
        outcome
    }

    async fn run_locked(
        &self,
        emp_id: &str,
        key: &str,
        trace: &mut StageTrace<'_>,
    ) -> Result<VerificationResult, VerificationError> {
        trace.enter(VerificationStage::FetchPending);
        let probe = timeout(self.config.fetch_timeout, self.cache.get(key))
            .await
            .map_err(|_| VerificationError::FetchTimeout(self.config.fetch_timeout))??
            .ok_or_else(|| VerificationError::NotStaged {
                emp_id: emp_id.to_string(),
            })?;

        trace.enter(VerificationStage::Verifying);
        let verdict = timeout(self.config.verification_timeout, self.compare(emp_id, probe))
            .await
            .map_err(|_| VerificationError::VerificationTimeout(self.config.verification_timeout))?;

        // A completed comparison consumes the probe, even when no face was found.
        if matches!(verdict, Ok(_) | Err(VerificationError::NoFaceDetected)) {
            trace.enter(VerificationStage::Cleanup);
            self.cleanup(key).await;
        }

        let found = verdict?;
        let result = self.config.profile.evaluate(found.distance);
        tracing::info!(
            emp_id,
            distance = result.distance,
            similarity = result.similarity_score,
            verified = result.verified,
            "face verification complete"
        );
        Ok(result)
    }

    async fn compare(&self, emp_id: &str, probe: Vec<u8>) -> Result<FaceMatch, VerificationError> {
        let reference = self
            .storage
            .reference_image(emp_id)
            .await
            .map_err(|err| match err {
                StorageError::NotFound(_) => VerificationError::ReferenceMissing {
                    emp_id: emp_id.to_string(),
                },
                other => VerificationError::Storage(other),
            })?;

        Ok(self
            .verifier
            .verify(reference, probe, &self.config.profile)
            .await?)
    }

    async fn cleanup(&self, key: &str) {
        match timeout(self.config.delete_timeout, self.cache.try_delete(key)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::warn!(key, error = %err, "cache delete failed, deferring");
                self.defer_delete(key);
            }
            Err(_) => {
                tracing::warn!(key, "cache delete timed out, deferring");
                self.defer_delete(key);
            }
        }
    }

    fn defer_delete(&self, key: &str) {
        let cache = self.cache.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let removed = cache.delete(&key).await;
            tracing::debug!(key = %key, removed, "deferred cache delete finished");
        });
    }
}
