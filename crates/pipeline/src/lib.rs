//! Lock-serialized coordinators over shared cache and object storage.
//!
//! [`VerificationCoordinator`] compares a staged probe image against an
//! employee's reference image. [`DocumentPipeline`] runs OCR over single
//! images and fans multi-page documents out page by page.
//!
//! ```no_run
//! use cache::{CacheConfig, DistributedLock, LockConfig, MemoryStore, ResourceCache};
//! use completion::SharedHttpClient;
//! use pipeline::{
//!     FsObjectStore, HttpFaceVerifier, Storage, StorageLayout, VerificationConfig,
//!     VerificationCoordinator,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let store = Arc::new(MemoryStore::new());
//! let coordinator = VerificationCoordinator::new(
//!     DistributedLock::new(store.clone(), LockConfig::default()),
//!     ResourceCache::new(store, CacheConfig::default()),
//!     Storage::new(Arc::new(FsObjectStore::new("./storage")), StorageLayout::default()),
//!     Arc::new(HttpFaceVerifier::new("http://localhost:5000", Arc::new(SharedHttpClient::default()))),
//!     VerificationConfig::default(),
//! );
//! let _result = coordinator.verify("E100").await;
//! # }
//! ```

pub mod codec;
mod document;
mod face;
mod ocr;
mod pool;
mod preprocess;
mod storage;
mod verification;

pub use codec::{default_codec, is_multi_page, CodecError, NoPageCodec, PageCodec};
pub use document::{
    DocumentConfig, DocumentDeps, DocumentError, DocumentOutcome, DocumentPipeline, PageResult,
};
pub use face::{
    FaceBackendError, FaceMatch, FaceVerifier, HttpFaceVerifier, SimilarityFormula,
    VerificationProfile, VerificationResult,
};
pub use ocr::{OcrBackend, OcrError, UpstageOcr};
pub use pool::{PoolError, WorkerPool};
pub use preprocess::{ImagePreprocessor, PreprocessError, Preprocessor};
pub use storage::{
    FsObjectStore, MemoryObjectStore, ObjectStore, Storage, StorageError, StorageLayout,
};
pub use verification::{
    VerificationConfig, VerificationCoordinator, VerificationError, VerificationStage,
};
