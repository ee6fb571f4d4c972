//! Chat completion against an Ollama-style backend.
//!
//! [`CompletionOrchestrator`] is the entry point. It rejects requests the
//! rate limiter refuses, holds a concurrency slot for the upstream call and
//! lets [`CompletionClient`] retry transient failures with linear backoff.
//! The transport is a [`SharedHttpClient`] injected by the owner, built on
//! first use and closed by `shutdown`.

mod client;
mod error;
mod http;
mod orchestrator;
mod probe;
mod types;

pub use client::{CompletionClient, CompletionConfig};
pub use error::CompletionError;
pub use http::SharedHttpClient;
pub use orchestrator::{CompletionOrchestrator, OrchestratorConfig};
pub use probe::{probe_backend, BackendStatus, ProbeState, RunningModel};
pub use types::{ChatMessage, ChatRequest, Role};
