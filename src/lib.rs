//! Workspace umbrella crate for the AI gateway.
//!
//! Re-exports the pieces most callers need so an embedding service can build
//! the orchestration layer without depending on each member crate directly:
//! admission and retry policy from `resilience`, the shared store and lock
//! from `cache`, the completion orchestrator, the verification and document
//! pipelines, and the HTTP server.

pub use cache::{
    CacheConfig, DistributedLock, KeyStrategy, KeyValueStore, LockConfig, LockGuard, MemoryStore,
    ResourceCache, StoreConfig, StoreError, ValueEncoding,
};
pub use completion::{
    BackendStatus, ChatMessage, ChatRequest, CompletionConfig, CompletionError,
    CompletionOrchestrator, OrchestratorConfig, ProbeState, SharedHttpClient,
};
pub use pipeline::{
    DocumentConfig, DocumentDeps, DocumentError, DocumentOutcome, DocumentPipeline,
    FaceBackendError, FaceMatch, FaceVerifier, HttpFaceVerifier, ImagePreprocessor,
    MemoryObjectStore, ObjectStore, OcrBackend, OcrError, PageCodec, Storage, StorageLayout,
    UpstageOcr, VerificationConfig, VerificationCoordinator, VerificationError,
    VerificationProfile, VerificationResult, WorkerPool,
};
pub use resilience::{
    ConcurrencyGate, ErrorKind, GateStats, RateLimitConfig, RateLimitStats, RateLimiter,
    RetryConfig,
};
pub use server::{build_router, start_server, Backends, ServerConfig, ServerError, ServerState};

#[cfg(feature = "backend-redis")]
pub use cache::RedisStore;
