use cache::{CacheConfig, KeyStrategy, LockConfig, StoreConfig};
use completion::{CompletionConfig, OrchestratorConfig};
use pipeline::{DocumentConfig, StorageLayout, VerificationConfig, VerificationProfile};
use resilience::{RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration
///
/// Read from an optional `gateway.{toml,yaml,json}` file, then from
/// `GATEWAY__*` environment variables (`GATEWAY__PORT=9000`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Whole-request deadline enforced by the HTTP layer.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,

    /// Upstream completion calls allowed in flight.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt completion timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Linear backoff unit between completion retries.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default)]
    pub ocr_api_key: String,

    #[serde(default = "default_ocr_endpoint")]
    pub ocr_endpoint: String,

    /// OCR calls allowed in flight across all documents.
    #[serde(default = "default_ocr_concurrency")]
    pub ocr_concurrency: usize,

    /// Blocking threads for image work.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    #[serde(default = "default_face_verifier_url")]
    pub face_verifier_url: String,

    #[serde(default = "default_face_model")]
    pub face_model: String,

    #[serde(default = "default_face_metric")]
    pub face_metric: String,

    #[serde(default = "default_face_threshold")]
    pub face_threshold: f64,

    #[serde(default = "default_verification_timeout_secs")]
    pub verification_timeout_secs: u64,

    #[serde(default = "default_cache_fetch_timeout_secs")]
    pub cache_fetch_timeout_secs: u64,

    /// Whole-document budget, download through upload and OCR.
    #[serde(default = "default_document_timeout_secs")]
    pub document_timeout_secs: u64,

    /// Must outlive both the document and the verification budget.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Shared store. Unset keeps locks and cache in process memory.
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    #[serde(default = "default_download_prefix")]
    pub download_prefix: String,

    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,

    #[serde(default = "default_reference_prefix")]
    pub reference_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            log_level: default_log_level(),
            enable_cors: default_true(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_size_mb: default_max_body_size_mb(),
            max_concurrent_requests: default_max_concurrent_requests(),
            requests_per_minute: default_requests_per_minute(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_unit_ms: default_backoff_unit_ms(),
            ollama_url: default_ollama_url(),
            model_name: default_model_name(),
            ocr_api_key: String::new(),
            ocr_endpoint: default_ocr_endpoint(),
            ocr_concurrency: default_ocr_concurrency(),
            worker_pool_size: default_worker_pool_size(),
            face_verifier_url: default_face_verifier_url(),
            face_model: default_face_model(),
            face_metric: default_face_metric(),
            face_threshold: default_face_threshold(),
            verification_timeout_secs: default_verification_timeout_secs(),
            cache_fetch_timeout_secs: default_cache_fetch_timeout_secs(),
            document_timeout_secs: default_document_timeout_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            redis_url: None,
            storage_root: default_storage_root(),
            download_prefix: default_download_prefix(),
            upload_prefix: default_upload_prefix(),
            reference_prefix: default_reference_prefix(),
        }
    }
}

impl ServerConfig {
    /// Load `.env`, then the config file and environment.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }

        let config = config::Config::builder()
            .add_source(config::File::with_name("gateway").required(false))
            .add_source(config::Environment::with_prefix("GATEWAY").separator("__"))
            .build()?
            .try_deserialize::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which a lock could expire while its holder is
    /// still inside the critical section.
    pub fn validate(&self) -> anyhow::Result<()> {
        let ttl = Duration::from_secs(self.lock_ttl_secs);
        let document = self.document_config().critical_section_budget();
        let verification = self.verification_config().critical_section_budget();
        let budget = document.max(verification);
        if ttl <= budget {
            anyhow::bail!(
                "lock_ttl_secs ({}s) must exceed the longest locked section ({budget:?}: \
                 document {document:?}, verification {verification:?})",
                self.lock_ttl_secs
            );
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size_mb * 1024 * 1024
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn store_config(&self) -> StoreConfig {
        match self.redis_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => StoreConfig::redis(url),
            None => StoreConfig::in_memory(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let retry = RetryConfig::default()
            .with_max_retries(self.max_retries)
            .with_backoff_unit(Duration::from_millis(self.backoff_unit_ms));
        let completion = CompletionConfig::default()
            .with_base_url(self.ollama_url.clone())
            .with_model(self.model_name.clone())
            .with_request_timeout(Duration::from_secs(self.timeout_secs))
            .with_retry(retry);

        OrchestratorConfig::new(completion)
            .with_rate_limit(RateLimitConfig::per_minute(self.requests_per_minute))
            .with_max_concurrent_requests(self.max_concurrent_requests)
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig::default().with_ttl(Duration::from_secs(self.lock_ttl_secs))
    }

    /// Staged probes are stored verbatim under `face:verify:<emp_id>`.
    pub fn staging_cache_config(&self) -> CacheConfig {
        CacheConfig::default().with_default_ttl(self.cache_ttl())
    }

    /// Source documents are cached under hashed `file:` keys.
    pub fn document_cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_default_ttl(self.cache_ttl())
            .with_key_strategy(KeyStrategy::hashed("file:"))
    }

    pub fn verification_config(&self) -> VerificationConfig {
        let profile = VerificationProfile::new(
            self.face_model.clone(),
            self.face_metric.clone(),
            self.face_threshold,
        );
        VerificationConfig::default()
            .with_fetch_timeout(Duration::from_secs(self.cache_fetch_timeout_secs))
            .with_verification_timeout(Duration::from_secs(self.verification_timeout_secs))
            .with_profile(profile)
    }

    pub fn document_config(&self) -> DocumentConfig {
        DocumentConfig::default()
            .with_ocr_timeout(Duration::from_secs(self.timeout_secs))
            .with_processing_timeout(Duration::from_secs(self.document_timeout_secs))
    }

    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout {
            download_prefix: self.download_prefix.clone(),
            upload_prefix: self.upload_prefix.clone(),
            reference_prefix: self.reference_prefix.clone(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_body_size_mb() -> usize {
    20
}

fn default_max_concurrent_requests() -> usize {
    100
}

fn default_requests_per_minute() -> u32 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model_name() -> String {
    "hf.co/QuantFactory/llama-3.2-Korean-Bllossom-3B-GGUF".to_string()
}

fn default_ocr_endpoint() -> String {
    "https://api.upstage.ai/v1/document-ai/ocr".to_string()
}

fn default_ocr_concurrency() -> usize {
    5
}

fn default_worker_pool_size() -> usize {
    3
}

fn default_face_verifier_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_face_model() -> String {
    "Facenet512".to_string()
}

fn default_face_metric() -> String {
    "cosine".to_string()
}

fn default_face_threshold() -> f64 {
    0.45
}

fn default_verification_timeout_secs() -> u64 {
    30
}

fn default_cache_fetch_timeout_secs() -> u64 {
    5
}

fn default_document_timeout_secs() -> u64 {
    90
}

fn default_lock_ttl_secs() -> u64 {
    120
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_storage_root() -> String {
    "./storage".to_string()
}

fn default_download_prefix() -> String {
    "img/".to_string()
}

fn default_upload_prefix() -> String {
    "processing/".to_string()
}

fn default_reference_prefix() -> String {
    "emp/".to_string()
}
