//! OCR over single images and multi-page documents.
//!
//! Every run holds the distributed lock for its filename. Pages fan out
//! through the worker pool and the OCR gate, come back in any order, and
//! are slotted by index before the merge so results always follow page
//! order. A failing page aborts the whole document.

use crate::codec::{is_multi_page, CodecError, PageCodec};
use crate::ocr::{OcrBackend, OcrError};
use crate::pool::{PoolError, WorkerPool};
use crate::preprocess::{PreprocessError, Preprocessor};
use crate::storage::{Storage, StorageError};
use bytes::Bytes;
use cache::{DistributedLock, ResourceCache, StoreError};
use futures::stream::{FuturesUnordered, StreamExt};
use resilience::{ConcurrencyGate, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{filename} is already being processed")]
    Busy { filename: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error("ocr call exceeded {0:?}")]
    OcrTimeout(Duration),
    #[error("processing exceeded {0:?}")]
    Timeout(Duration),
    #[error("page {page} failed: {source}")]
    Page {
        page: usize,
        source: Box<DocumentError>,
    },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DocumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentError::InvalidInput(_) => ErrorKind::InvalidInput,
            DocumentError::Busy { .. } => ErrorKind::ResourceBusy,
            DocumentError::Store(e) => e.kind(),
            DocumentError::Storage(e) => e.kind(),
            DocumentError::Preprocess(e) => e.kind(),
            DocumentError::Codec(e) => e.kind(),
            DocumentError::Ocr(e) => e.kind(),
            DocumentError::OcrTimeout(_) | DocumentError::Timeout(_) => {
                ErrorKind::UpstreamTimeout
            }
            DocumentError::Page { source, .. } => source.kind(),
            DocumentError::Pool(e) => e.kind(),
            DocumentError::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult {
    /// 1-based.
    pub page: usize,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Image {
        filename: String,
        processed_artifact_ref: String,
        data: Value,
    },
    Document {
        filename: String,
        total_pages: usize,
        per_page_results: Vec<PageResult>,
        merged_artifact_ref: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub lock_attempts: u32,
    #[serde(with = "resilience::serde_millis")]
    pub lock_retry_delay: Duration,
    /// Deadline for each OCR call.
    #[serde(with = "resilience::serde_millis")]
    pub ocr_timeout: Duration,
    /// Deadline for everything done under the lock. The lock TTL must be
    /// longer than this.
    #[serde(with = "resilience::serde_millis")]
    pub processing_timeout: Duration,
    /// TTL for the cached source document. `None` uses the cache default.
    #[serde(default)]
    pub source_ttl: Option<Duration>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            lock_attempts: 3,
            lock_retry_delay: Duration::from_millis(500),
            ocr_timeout: Duration::from_secs(60),
            processing_timeout: Duration::from_secs(90),
            source_ttl: None,
        }
    }
}

impl DocumentConfig {
    pub fn with_ocr_timeout(mut self, timeout: Duration) -> Self {
        self.ocr_timeout = timeout;
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub fn with_lock_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.lock_attempts = attempts;
        self.lock_retry_delay = delay;
        self
    }

    /// Longest time one run can hold the lock.
    pub fn critical_section_budget(&self) -> Duration {
        self.processing_timeout
    }
}

/// Collaborators of a [`DocumentPipeline`].
#[derive(Clone)]
pub struct DocumentDeps {
    pub lock: DistributedLock,
    /// Source document cache, usually with hashed `file:` keys.
    pub cache: ResourceCache,
    pub storage: Storage,
    pub ocr: Arc<dyn OcrBackend>,
    pub preprocessor: Arc<dyn Preprocessor>,
    pub codec: Arc<dyn PageCodec>,
    pub pool: WorkerPool,
    /// Caps concurrent OCR calls across every document.
    pub gate: ConcurrencyGate,
}

#[derive(Clone)]
pub struct DocumentPipeline {
    deps: DocumentDeps,
    config: DocumentConfig,
}

impl DocumentPipeline {
    pub fn new(deps: DocumentDeps, config: DocumentConfig) -> Self {
        Self { deps, config }
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.deps.gate
    }

    pub async fn process(&self, filename: &str) -> Result<DocumentOutcome, DocumentError> {
        if filename.trim().is_empty() {
            return Err(DocumentError::InvalidInput("filename must not be empty".to_string()));
        }

        let resource = self.deps.cache.store_key(filename);
        let guard = self
            .deps
            .lock
            .lock(&resource, self.config.lock_attempts, self.config.lock_retry_delay)
            .await?
            .ok_or_else(|| DocumentError::Busy {
                filename: filename.to_string(),
            })?;

        let budget = self.config.processing_timeout;
        let outcome = tokio::time::timeout(budget, self.process_locked(filename))
            .await
            .unwrap_or_else(|_| Err(DocumentError::Timeout(budget)));
        match &outcome {
            Ok(_) => {
                self.deps.cache.delete(filename).await;
            }
            Err(err) => {
                tracing::error!(filename, error = %err, kind = %err.kind(), "document processing failed");
                let removed = self.deps.cache.delete(filename).await;
                tracing::debug!(filename, removed, "cleaned up cached source");
            }
        }
        guard.release().await;
        outcome
    }

    async fn process_locked(&self, filename: &str) -> Result<DocumentOutcome, DocumentError> {
        let source = self.fetch_source(filename).await?;
        if is_multi_page(filename, &source) {
            self.process_pages(filename, source).await
        } else {
            self.process_image(filename, source).await
        }
    }

    /// Cache first, then the download prefix of object storage.
    async fn fetch_source(&self, filename: &str) -> Result<Vec<u8>, DocumentError> {
        match self.deps.cache.get(filename).await {
            Ok(Some(bytes)) => return Ok(bytes),
            Ok(None) => {}
            Err(err) => tracing::warn!(filename, error = %err, "source cache unavailable"),
        }

        let bytes = self.deps.storage.download(filename).await?;
        self.deps
            .cache
            .save(filename, &bytes, self.config.source_ttl)
            .await;
        Ok(bytes)
    }

    async fn process_image(
        &self,
        filename: &str,
        source: Vec<u8>,
    ) -> Result<DocumentOutcome, DocumentError> {
        let preprocessor = self.deps.preprocessor.clone();
        let processed = self
            .deps
            .pool
            .run(move || preprocessor.preprocess(&source))
            .await??;

        let processed_artifact_ref = self.deps.storage.upload(filename, &processed).await?;
        let data = self.recognize(filename, Bytes::from(processed)).await?;
        tracing::info!(filename, "image processed");

        Ok(DocumentOutcome::Image {
            filename: filename.to_string(),
            processed_artifact_ref,
            data,
        })
    }

    async fn process_pages(
        &self,
        filename: &str,
        source: Vec<u8>,
    ) -> Result<DocumentOutcome, DocumentError> {
        let codec = self.deps.codec.clone();
        let pages = self.deps.pool.run(move || codec.split(&source)).await??;
        if pages.is_empty() {
            return Err(DocumentError::InvalidInput(format!("{filename} has no pages")));
        }
        let total_pages = pages.len();
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(filename);
        tracing::info!(filename, total_pages, "document split");

        let mut pending: FuturesUnordered<_> = pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| {
                let name = format!("{stem}_page_{}.jpg", index + 1);
                async move { (index, self.process_page(&name, page).await) }
            })
            .collect();

        let mut slots: Vec<Option<(Bytes, Value)>> = vec![None; total_pages];
        while let Some((index, result)) = pending.next().await {
            match result {
                Ok(done) => {
                    tracing::debug!(filename, page = index + 1, "page recognized");
                    slots[index] = Some(done);
                }
                Err(err) => {
                    return Err(DocumentError::Page {
                        page: index + 1,
                        source: Box::new(err),
                    });
                }
            }
        }

        let (images, per_page_results): (Vec<Vec<u8>>, Vec<PageResult>) = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.map(|(image, data)| {
                    (
                        Vec::from(image),
                        PageResult {
                            page: index + 1,
                            data,
                        },
                    )
                })
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| DocumentError::Internal("page result missing".to_string()))?
            .into_iter()
            .unzip();

        let codec = self.deps.codec.clone();
        let merged = self.deps.pool.run(move || codec.merge(&images)).await??;
        let merged_artifact_ref = self.deps.storage.upload(filename, &merged).await?;
        tracing::info!(filename, total_pages, "document processed");

        Ok(DocumentOutcome::Document {
            filename: filename.to_string(),
            total_pages,
            per_page_results,
            merged_artifact_ref,
        })
    }

    async fn process_page(&self, name: &str, page: Vec<u8>) -> Result<(Bytes, Value), DocumentError> {
        let preprocessor = self.deps.preprocessor.clone();
        let processed = self
            .deps
            .pool
            .run(move || preprocessor.preprocess(&page))
            .await??;
        let processed = Bytes::from(processed);
        let data = self.recognize(name, processed.clone()).await?;
        Ok((processed, data))
    }

    async fn recognize(&self, name: &str, document: Bytes) -> Result<Value, DocumentError> {
        let _permit = self
            .deps
            .gate
            .acquire()
            .await
            .map_err(|_| DocumentError::Internal("ocr gate closed".to_string()))?;
        tokio::time::timeout(self.config.ocr_timeout, self.deps.ocr.recognize(name, document))
            .await
            .map_err(|_| DocumentError::OcrTimeout(self.config.ocr_timeout))?
            .map_err(DocumentError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NoPageCodec;
    use crate::preprocess::tests::sample_png;
    use crate::preprocess::ImagePreprocessor;
    use crate::storage::{MemoryObjectStore, ObjectStore, StorageLayout};
    use async_trait::async_trait;
    use cache::{CacheConfig, KeyStrategy, KeyValueStore, LockConfig, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// `%PDF-` followed by `|`-separated page payloads.
    struct PipeCodec;

    impl PageCodec for PipeCodec {
        fn split(&self, document: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
            let body = document
                .strip_prefix(b"%PDF-")
                .ok_or_else(|| CodecError::Load("missing header".to_string()))?;
            Ok(body.split(|b| *b == b'|').map(<[u8]>::to_vec).collect())
        }

        fn merge(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
            let mut merged = b"%PDF-".to_vec();
            merged.extend(pages.join(&b'|'));
            Ok(merged)
        }
    }

    struct TagPreprocessor;

    impl Preprocessor for TagPreprocessor {
        fn preprocess(&self, image: &[u8]) -> Result<Vec<u8>, PreprocessError> {
            let mut out = b"pp:".to_vec();
            out.extend_from_slice(image);
            Ok(out)
        }
    }

    /// Later pages answer first. Fails pages whose payload contains `fail`.
    struct ReverseOcr {
        total: u64,
        delay: Duration,
        calls: AtomicU32,
    }

    impl ReverseOcr {
        fn new(total: u64, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                total,
                delay,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl OcrBackend for ReverseOcr {
        async fn recognize(&self, name: &str, document: Bytes) -> Result<Value, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let page: u64 = name
                .rsplit_once("_page_")
                .and_then(|(_, rest)| rest.trim_end_matches(".jpg").parse().ok())
                .unwrap_or(1);
            tokio::time::sleep(self.delay * (self.total + 1 - page.min(self.total)) as u32).await;

            let text = String::from_utf8_lossy(&document).into_owned();
            if text.contains("fail") {
                return Err(OcrError::Api {
                    status: 400,
                    body: "unreadable page".to_string(),
                });
            }
            Ok(json!({ "name": name, "text": text }))
        }
    }

    struct Fixture {
        pipeline: DocumentPipeline,
        store: Arc<MemoryStore>,
        objects: Arc<MemoryObjectStore>,
        lock: DistributedLock,
        cache: ResourceCache,
    }

    /// Memory store whose lock deletes always fail.
    struct StuckLockStore {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl KeyValueStore for StuckLockStore {
        async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError> {
            self.inner.set_nx_ex(key, value, ttl).await
        }

        async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
            self.inner.set_ex(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn del(&self, key: &str) -> Result<bool, StoreError> {
            if key.starts_with("lock:") {
                return Err(StoreError::Command("connection reset".to_string()));
            }
            self.inner.del(key).await
        }

        fn name(&self) -> &'static str {
            "stuck-lock"
        }
    }

    fn test_config() -> DocumentConfig {
        DocumentConfig::default()
            .with_lock_retry(1, Duration::ZERO)
            .with_ocr_timeout(Duration::from_secs(5))
    }

    fn fixture(
        ocr: Arc<dyn OcrBackend>,
        preprocessor: Arc<dyn Preprocessor>,
        codec: Arc<dyn PageCodec>,
        gate_size: usize,
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        fixture_on(store.clone(), store, ocr, preprocessor, codec, gate_size, test_config())
    }

    fn fixture_on(
        store: Arc<MemoryStore>,
        kv: Arc<dyn KeyValueStore>,
        ocr: Arc<dyn OcrBackend>,
        preprocessor: Arc<dyn Preprocessor>,
        codec: Arc<dyn PageCodec>,
        gate_size: usize,
        config: DocumentConfig,
    ) -> Fixture {
        let objects = Arc::new(MemoryObjectStore::new());
        let lock = DistributedLock::new(kv.clone(), LockConfig::default());
        let cache = ResourceCache::new(
            kv,
            CacheConfig::default().with_key_strategy(KeyStrategy::hashed("file:")),
        );
        let deps = DocumentDeps {
            lock: lock.clone(),
            cache: cache.clone(),
            storage: Storage::new(objects.clone(), StorageLayout::default()),
            ocr,
            preprocessor,
            codec,
            pool: WorkerPool::new(3),
            gate: ConcurrencyGate::new(gate_size),
        };
        Fixture {
            pipeline: DocumentPipeline::new(deps, config),
            store,
            objects,
            lock,
            cache,
        }
    }

    impl Fixture {
        async fn lock_is_free(&self, filename: &str) -> bool {
            let resource = self.cache.store_key(filename);
            let free = self.lock.acquire_with(&resource, 1, Duration::ZERO).await.unwrap();
            if free {
                self.lock.release(&resource).await.unwrap();
            }
            free
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pages_come_back_in_page_order() {
        let ocr = ReverseOcr::new(3, Duration::from_millis(30));
        let fx = fixture(ocr.clone(), Arc::new(TagPreprocessor), Arc::new(PipeCodec), 3);
        fx.objects
            .put("img/report.pdf", b"%PDF-one|two|three")
            .await
            .unwrap();

        let outcome = fx.pipeline.process("report.pdf").await.unwrap();

        let DocumentOutcome::Document {
            total_pages,
            per_page_results,
            merged_artifact_ref,
            ..
        } = outcome
        else {
            panic!("expected a document outcome");
        };
        assert_eq!(total_pages, 3);
        let pages: Vec<usize> = per_page_results.iter().map(|p| p.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        let texts: Vec<&str> = per_page_results
            .iter()
            .map(|p| p.data["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["pp:one", "pp:two", "pp:three"]);
        assert_eq!(per_page_results[0].data["name"], "report_page_1.jpg");

        assert_eq!(merged_artifact_ref, "processing/report.pdf");
        let merged = fx.objects.get("processing/report.pdf").await.unwrap();
        assert_eq!(merged, b"%PDF-pp:one|pp:two|pp:three");

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fx.cache.get("report.pdf").await.unwrap(), None);
        assert!(fx.lock_is_free("report.pdf").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ocr_gate_bounds_page_fan_out() {
        let ocr = ReverseOcr::new(6, Duration::from_millis(5));
        let fx = fixture(ocr, Arc::new(TagPreprocessor), Arc::new(PipeCodec), 2);
        fx.objects
            .put("img/big.pdf", b"%PDF-a|b|c|d|e|f")
            .await
            .unwrap();

        fx.pipeline.process("big.pdf").await.unwrap();

        let stats = fx.pipeline.gate().stats();
        assert!(stats.peak_in_flight <= 2);
        assert_eq!(stats.total_acquired, 6);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failing_page_aborts_document_and_cleans_up() {
        let ocr = ReverseOcr::new(3, Duration::from_millis(10));
        let fx = fixture(ocr, Arc::new(TagPreprocessor), Arc::new(PipeCodec), 3);
        fx.objects
            .put("img/scan.pdf", b"%PDF-one|fail|three")
            .await
            .unwrap();

        let err = fx.pipeline.process("scan.pdf").await.unwrap_err();

        assert!(matches!(err, DocumentError::Page { page: 2, .. }));
        assert_eq!(err.kind(), ErrorKind::ProcessingFailure);
        assert!(!fx.objects.exists("processing/scan.pdf").await.unwrap());
        assert_eq!(fx.cache.get("scan.pdf").await.unwrap(), None);
        assert!(fx.lock_is_free("scan.pdf").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn single_image_is_preprocessed_uploaded_and_recognized() {
        let ocr = ReverseOcr::new(1, Duration::ZERO);
        let fx = fixture(
            ocr.clone(),
            Arc::new(ImagePreprocessor::default()),
            Arc::new(NoPageCodec),
            3,
        );
        fx.objects
            .put("img/receipt.png", &sample_png(40, 20))
            .await
            .unwrap();

        let outcome = fx.pipeline.process("receipt.png").await.unwrap();

        let DocumentOutcome::Image {
            processed_artifact_ref,
            data,
            ..
        } = outcome
        else {
            panic!("expected an image outcome");
        };
        assert_eq!(processed_artifact_ref, "processing/receipt.png");
        assert_eq!(data["name"], "receipt.png");
        let processed = fx.objects.get("processing/receipt.png").await.unwrap();
        assert!(processed.starts_with(&[0xFF, 0xD8]));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert!(fx.store.is_empty());
        assert!(fx.lock_is_free("receipt.png").await);
    }

    #[tokio::test]
    async fn cached_source_skips_storage() {
        let fx = fixture(
            ReverseOcr::new(1, Duration::ZERO),
            Arc::new(TagPreprocessor),
            Arc::new(PipeCodec),
            3,
        );
        assert!(fx.cache.save("note.txt", b"cached", None).await);

        let outcome = fx.pipeline.process("note.txt").await.unwrap();
        let DocumentOutcome::Image { data, .. } = outcome else {
            panic!("expected an image outcome");
        };
        assert_eq!(data["text"], "pp:cached");
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let fx = fixture(
            ReverseOcr::new(1, Duration::ZERO),
            Arc::new(TagPreprocessor),
            Arc::new(PipeCodec),
            3,
        );

        let err = fx.pipeline.process("ghost.jpg").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(fx.lock_is_free("ghost.jpg").await);
    }

    #[tokio::test]
    async fn locked_filename_is_busy() {
        let fx = fixture(
            ReverseOcr::new(1, Duration::ZERO),
            Arc::new(TagPreprocessor),
            Arc::new(PipeCodec),
            3,
        );
        fx.objects.put("img/a.jpg", b"x").await.unwrap();
        assert!(fx.lock.acquire(&fx.cache.store_key("a.jpg")).await.unwrap());

        let err = fx.pipeline.process("a.jpg").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceBusy);
    }

    #[tokio::test]
    async fn documents_need_a_codec() {
        let fx = fixture(
            ReverseOcr::new(1, Duration::ZERO),
            Arc::new(TagPreprocessor),
            Arc::new(NoPageCodec),
            3,
        );
        fx.objects.put("img/contract.pdf", b"%PDF-1.7").await.unwrap();

        let err = fx.pipeline.process("contract.pdf").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ocr_times_out() {
        let fx = fixture(
            ReverseOcr::new(1, Duration::from_secs(30)),
            Arc::new(TagPreprocessor),
            Arc::new(PipeCodec),
            3,
        );
        fx.objects.put("img/slow.jpg", b"x").await.unwrap();

        let err = fx.pipeline.process("slow.jpg").await.unwrap_err();
        assert!(matches!(err, DocumentError::OcrTimeout(_)));
        assert_eq!(err.kind(), ErrorKind::UpstreamTimeout);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn page_names_use_the_file_stem() {
        let ocr = ReverseOcr::new(2, Duration::ZERO);
        let fx = fixture(ocr, Arc::new(TagPreprocessor), Arc::new(PipeCodec), 2);
        fx.objects
            .put("img/scans.v2/report.pdf", b"%PDF-one|two")
            .await
            .unwrap();

        let outcome = fx.pipeline.process("scans.v2/report.pdf").await.unwrap();
        let DocumentOutcome::Document {
            per_page_results, ..
        } = outcome
        else {
            panic!("expected a document outcome");
        };
        let names: Vec<&str> = per_page_results
            .iter()
            .map(|p| p.data["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["report_page_1.jpg", "report_page_2.jpg"]);
    }

    #[tokio::test(start_paused = true)]
    async fn default_lock_outlives_a_slow_run_within_budget() {
        let store = Arc::new(MemoryStore::new());
        let config = DocumentConfig::default().with_lock_retry(1, Duration::ZERO);
        let fx = Arc::new(fixture_on(
            store.clone(),
            store,
            ReverseOcr::new(1, Duration::from_secs(45)),
            Arc::new(TagPreprocessor),
            Arc::new(PipeCodec),
            3,
            config,
        ));
        fx.objects.put("img/slow.jpg", b"x").await.unwrap();

        let run = tokio::spawn({
            let fx = fx.clone();
            async move { fx.pipeline.process("slow.jpg").await }
        });
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!run.is_finished());
        assert!(!fx.lock_is_free("slow.jpg").await);

        let outcome = run.await.unwrap();
        assert!(outcome.is_ok());
        assert!(fx.lock_is_free("slow.jpg").await);
    }

    #[tokio::test(start_paused = true)]
    async fn run_past_processing_budget_times_out_and_cleans_up() {
        let store = Arc::new(MemoryStore::new());
        let config = test_config()
            .with_ocr_timeout(Duration::from_secs(60))
            .with_processing_timeout(Duration::from_secs(10));
        let fx = fixture_on(
            store.clone(),
            store,
            ReverseOcr::new(1, Duration::from_secs(20)),
            Arc::new(TagPreprocessor),
            Arc::new(PipeCodec),
            3,
            config,
        );
        fx.objects.put("img/slow.jpg", b"x").await.unwrap();

        let err = fx.pipeline.process("slow.jpg").await.unwrap_err();
        assert!(matches!(err, DocumentError::Timeout(d) if d == Duration::from_secs(10)));
        assert_eq!(err.kind(), ErrorKind::UpstreamTimeout);
        assert_eq!(fx.cache.get("slow.jpg").await.unwrap(), None);
        assert!(fx.lock_is_free("slow.jpg").await);
    }

    #[tokio::test]
    async fn failed_lock_release_keeps_the_outcome() {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(StuckLockStore {
            inner: store.clone(),
        });
        let fx = fixture_on(
            store.clone(),
            kv,
            ReverseOcr::new(1, Duration::ZERO),
            Arc::new(TagPreprocessor),
            Arc::new(PipeCodec),
            3,
            test_config(),
        );
        fx.objects.put("img/memo.jpg", b"memo").await.unwrap();

        let outcome = fx.pipeline.process("memo.jpg").await.unwrap();
        let DocumentOutcome::Image { data, .. } = outcome else {
            panic!("expected an image outcome");
        };
        assert_eq!(data["text"], "pp:memo");
        assert_eq!(fx.cache.get("memo.jpg").await.unwrap(), None);
        // Only the lock key is left, waiting for its TTL.
        assert_eq!(store.len(), 1);
    }
}
