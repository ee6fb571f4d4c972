use crate::config::ServerConfig;
use crate::error::ServerResult;
use cache::{DistributedLock, KeyValueStore, ResourceCache};
use completion::{CompletionOrchestrator, SharedHttpClient};
use metrics_exporter_prometheus::PrometheusHandle;
use pipeline::{
    default_codec, DocumentDeps, DocumentPipeline, FaceVerifier, FsObjectStore, HttpFaceVerifier,
    ImagePreprocessor, ObjectStore, OcrBackend, Storage, UpstageOcr, VerificationCoordinator,
    WorkerPool,
};
use resilience::ConcurrencyGate;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub orchestrator: Arc<CompletionOrchestrator>,
    pub verifier: VerificationCoordinator,
    pub documents: DocumentPipeline,
    /// Prometheus render handle; `None` when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    store_name: &'static str,
}

/// External backends the state is wired to.
pub struct Backends {
    pub store: Arc<dyn KeyValueStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub face: Arc<dyn FaceVerifier>,
    pub ocr: Arc<dyn OcrBackend>,
    pub http: Arc<SharedHttpClient>,
}

impl ServerState {
    /// Connect the configured store and HTTP backends.
    pub async fn from_config(config: ServerConfig) -> ServerResult<Self> {
        let store = config.store_config().build().await?;
        let http = Arc::new(SharedHttpClient::default());
        let backends = Backends {
            store,
            objects: Arc::new(FsObjectStore::new(&config.storage_root)),
            face: Arc::new(HttpFaceVerifier::new(
                config.face_verifier_url.clone(),
                http.clone(),
            )),
            ocr: Arc::new(UpstageOcr::new(
                config.ocr_endpoint.clone(),
                config.ocr_api_key.clone(),
                http.clone(),
                Duration::from_secs(config.timeout_secs),
            )),
            http,
        };
        Ok(Self::assemble(config, backends))
    }

    pub fn assemble(config: ServerConfig, backends: Backends) -> Self {
        let Backends {
            store,
            objects,
            face,
            ocr,
            http,
        } = backends;

        let lock = DistributedLock::new(store.clone(), config.lock_config());
        let storage = Storage::new(objects, config.storage_layout());

        let verifier = VerificationCoordinator::new(
            lock.clone(),
            ResourceCache::new(store.clone(), config.staging_cache_config()),
            storage.clone(),
            face,
            config.verification_config(),
        );

        let documents = DocumentPipeline::new(
            DocumentDeps {
                lock,
                cache: ResourceCache::new(store.clone(), config.document_cache_config()),
                storage,
                ocr,
                preprocessor: Arc::new(ImagePreprocessor::default()),
                codec: default_codec(),
                pool: WorkerPool::new(config.worker_pool_size),
                gate: ConcurrencyGate::new(config.ocr_concurrency),
            },
            config.document_config(),
        );

        let orchestrator = Arc::new(CompletionOrchestrator::new(
            config.orchestrator_config(),
            http,
        ));

        Self {
            config: Arc::new(config),
            orchestrator,
            verifier,
            documents,
            metrics: None,
            store_name: store.name(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn store_name(&self) -> &'static str {
        self.store_name
    }

    /// Close shared transports. The orchestrator owns the client every
    /// backend was built with.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
