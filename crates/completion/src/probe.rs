//! Backend liveness via `GET <base>/api/ps`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Connected,
    NoModelsRunning,
    Error,
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningModel {
    pub name: String,
    /// Size in GiB, two decimals.
    pub size: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub state: ProbeState,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<RunningModel>,
}

impl BackendStatus {
    fn new(state: ProbeState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: detail.into(),
            model: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.state, ProbeState::Connected | ProbeState::NoModelsRunning)
    }
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    #[serde(default)]
    models: Vec<PsModel>,
}

#[derive(Debug, Deserialize)]
struct PsModel {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    details: Value,
}

/// Ask the backend which models are loaded. Never fails; problems are
/// reported in the returned status.
pub async fn probe_backend(client: &reqwest::Client, base_url: &str, timeout: Duration) -> BackendStatus {
    if base_url.trim().is_empty() {
        return BackendStatus::new(ProbeState::NotConfigured, "completion backend url is not set");
    }

    let url = format!("{}/api/ps", base_url.trim_end_matches('/'));
    let response = match client.get(&url).timeout(timeout).send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "completion backend probe failed");
            return BackendStatus::new(ProbeState::Error, format!("connection failed: {err}"));
        }
    };

    if !response.status().is_success() {
        return BackendStatus::new(
            ProbeState::Error,
            format!("backend answered {}", response.status().as_u16()),
        );
    }

    match response.json::<PsResponse>().await {
        Ok(ps) => match ps.models.into_iter().next() {
            Some(model) => BackendStatus {
                state: ProbeState::Connected,
                detail: "running".to_string(),
                model: Some(RunningModel {
                    name: model.name,
                    size: format!("{:.2}GB", model.size as f64 / (1024.0 * 1024.0 * 1024.0)),
                    details: model.details,
                }),
            },
            None => BackendStatus::new(ProbeState::NoModelsRunning, "no models loaded"),
        },
        Err(err) => BackendStatus::new(ProbeState::Error, format!("unreadable /api/ps body: {err}")),
    }
}
