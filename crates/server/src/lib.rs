//! Gateway Server - HTTP surface for the AI gateway
//!
//! Exposes three backend integrations behind one service:
//!
//! - **Chat completion**: rate limited, concurrency bounded and retried
//!   against an Ollama-compatible backend
//! - **Face verification**: probe staging plus a locked, time-boxed
//!   comparison against stored reference images
//! - **Document OCR**: single images or multi-page documents fanned out
//!   page by page and merged back in order
//!
//! Every failure maps to one stable status code and a
//! `{"error": {"code", "message"}}` body.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! - `GET /` - API information
//! - `GET /health` - Liveness plus completion backend probe
//! - `GET /ready` - Readiness with store and gate counters
//! - `GET /metrics` - Prometheus metrics
//! - `POST /api/llama/chat` - Chat completion
//! - `GET /api/llama/status` - Model, rate limit and gate status
//! - `POST /face/stage/{emp_id}` - Stage a probe image
//! - `POST /face/verify/{emp_id}` - Verify the staged probe
//! - `POST /ocr/process?filename=` - OCR a stored file

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::{Backends, ServerState};
