//! Face verification backend and the configured decision profile.

use async_trait::async_trait;
use completion::SharedHttpClient;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use resilience::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaceBackendError {
    #[error("no face detected in one of the images")]
    NoFaceDetected,
    #[error("face backend returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("face backend transport error: {0}")]
    Transport(String),
    #[error("face backend timed out")]
    Timeout,
    #[error("face backend response malformed: {0}")]
    Malformed(String),
}

impl FaceBackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FaceBackendError::NoFaceDetected => ErrorKind::InvalidInput,
            FaceBackendError::Api { status, .. } if *status >= 500 || *status == 429 => {
                ErrorKind::UpstreamUnavailable
            }
            FaceBackendError::Api { .. } | FaceBackendError::Malformed(_) => {
                ErrorKind::ProcessingFailure
            }
            FaceBackendError::Transport(_) => ErrorKind::UpstreamUnavailable,
            FaceBackendError::Timeout => ErrorKind::UpstreamTimeout,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FaceBackendError::Timeout
        } else {
            FaceBackendError::Transport(err.to_string())
        }
    }
}

/// How a raw distance becomes a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "formula", rename_all = "snake_case")]
pub enum SimilarityFormula {
    /// `1 - distance`
    #[default]
    OneMinusDistance,
    /// `clamp(1 - distance / max_distance, 0, 1)`, for unbounded metrics.
    ScaledClipped { max_distance: f64 },
}

impl SimilarityFormula {
    pub fn score(&self, distance: f64) -> f64 {
        match *self {
            SimilarityFormula::OneMinusDistance => 1.0 - distance,
            SimilarityFormula::ScaledClipped { max_distance } => {
                if max_distance <= 0.0 {
                    return 0.0;
                }
                (1.0 - distance / max_distance).clamp(0.0, 1.0)
            }
        }
    }
}

/// Model, metric and threshold travel together; mixing values from
/// different models gives meaningless decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationProfile {
    pub model: String,
    pub metric: String,
    pub detector: String,
    pub threshold: f64,
    #[serde(default)]
    pub similarity: SimilarityFormula,
}

impl Default for VerificationProfile {
    fn default() -> Self {
        Self {
            model: "Facenet512".to_string(),
            metric: "cosine".to_string(),
            detector: "retinaface".to_string(),
            threshold: 0.45,
            similarity: SimilarityFormula::OneMinusDistance,
        }
    }
}

impl VerificationProfile {
    pub fn new(model: impl Into<String>, metric: impl Into<String>, threshold: f64) -> Self {
        Self {
            model: model.into(),
            metric: metric.into(),
            threshold,
            ..Self::default()
        }
    }

    pub fn with_detector(mut self, detector: impl Into<String>) -> Self {
        self.detector = detector.into();
        self
    }

    pub fn with_similarity(mut self, similarity: SimilarityFormula) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn evaluate(&self, distance: f64) -> VerificationResult {
        VerificationResult {
            verified: distance < self.threshold,
            distance,
            threshold: self.threshold,
            model: self.model.clone(),
            similarity_score: self.similarity.score(distance),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub distance: f64,
    pub threshold: f64,
    pub model: String,
    pub similarity_score: f64,
}

/// What the backend reports for one comparison.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaceMatch {
    pub distance: f64,
    #[serde(default)]
    pub facial_areas: Option<Value>,
}

#[async_trait]
pub trait FaceVerifier: Send + Sync {
    async fn verify(
        &self,
        reference: Vec<u8>,
        probe: Vec<u8>,
        profile: &VerificationProfile,
    ) -> Result<FaceMatch, FaceBackendError>;
}

/// Verifier service reached over HTTP at `<base_url>/verify`.
#[derive(Debug, Clone)]
pub struct HttpFaceVerifier {
    base_url: String,
    http: Arc<SharedHttpClient>,
}

impl HttpFaceVerifier {
    pub fn new(base_url: impl Into<String>, http: Arc<SharedHttpClient>) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }

    pub fn verify_endpoint(&self) -> String {
        format!("{}/verify", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl FaceVerifier for HttpFaceVerifier {
    async fn verify(
        &self,
        reference: Vec<u8>,
        probe: Vec<u8>,
        profile: &VerificationProfile,
    ) -> Result<FaceMatch, FaceBackendError> {
        let client = self.http.get().await.map_err(FaceBackendError::from_reqwest)?;
        let form = Form::new()
            .part("img1", Part::bytes(reference).file_name("reference.jpg"))
            .part("img2", Part::bytes(probe).file_name("probe.jpg"))
            .text("model_name", profile.model.clone())
            .text("distance_metric", profile.metric.clone())
            .text("detector_backend", profile.detector.clone());

        let response = client
            .post(self.verify_endpoint())
            .multipart(form)
            .send()
            .await
            .map_err(FaceBackendError::from_reqwest)?;

        match response.status() {
            StatusCode::OK => response
                .json::<FaceMatch>()
                .await
                .map_err(|e| FaceBackendError::Malformed(e.to_string())),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(FaceBackendError::NoFaceDetected)
            }
            status => Err(FaceBackendError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_backend;
    use axum::extract::Multipart;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    #[test]
    fn default_profile_decides_below_threshold() {
        let profile = VerificationProfile::default();

        let hit = profile.evaluate(0.2116);
        assert!(hit.verified);
        assert_eq!(hit.model, "Facenet512");
        assert!((hit.similarity_score - 0.7884).abs() < 1e-9);

        let boundary = profile.evaluate(0.45);
        assert!(!boundary.verified);
    }

    #[test]
    fn scaled_similarity_is_clipped() {
        let formula = SimilarityFormula::ScaledClipped { max_distance: 40.0 };
        assert_eq!(formula.score(0.0), 1.0);
        assert_eq!(formula.score(20.0), 0.5);
        assert_eq!(formula.score(80.0), 0.0);
        assert_eq!(SimilarityFormula::ScaledClipped { max_distance: 0.0 }.score(1.0), 0.0);
    }

    #[test]
    fn euclidean_profile_keeps_its_own_threshold() {
        let profile = VerificationProfile::new("Facenet512", "euclidean", 20.0)
            .with_similarity(SimilarityFormula::ScaledClipped { max_distance: 40.0 });
        let result = profile.evaluate(12.0);
        assert!(result.verified);
        assert_eq!(result.threshold, 20.0);
        assert!((result.similarity_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn profile_deserializes_with_default_formula() {
        let profile: VerificationProfile = serde_json::from_value(json!({
            "model": "ArcFace",
            "metric": "cosine",
            "detector": "opencv",
            "threshold": 0.68
        }))
        .unwrap();
        assert_eq!(profile.similarity, SimilarityFormula::OneMinusDistance);
    }

    async fn inspect(mut multipart: Multipart) -> Json<Value> {
        let mut fields = serde_json::Map::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            let text = String::from_utf8_lossy(&field.bytes().await.unwrap()).into_owned();
            fields.insert(name, Value::String(text));
        }
        let distance = if fields.get("img1") == fields.get("img2") { 0.1 } else { 0.9 };
        Json(json!({ "distance": distance, "facial_areas": fields }))
    }

    #[tokio::test]
    async fn sends_both_images_and_profile() {
        let url = spawn_backend(Router::new().route("/verify", post(inspect))).await;
        let verifier = HttpFaceVerifier::new(url, Arc::new(SharedHttpClient::default()));

        let found = verifier
            .verify(b"face".to_vec(), b"face".to_vec(), &VerificationProfile::default())
            .await
            .unwrap();

        assert_eq!(found.distance, 0.1);
        let areas = found.facial_areas.unwrap();
        assert_eq!(areas["model_name"], "Facenet512");
        assert_eq!(areas["distance_metric"], "cosine");
        assert_eq!(areas["detector_backend"], "retinaface");
    }

    #[tokio::test]
    async fn unprocessable_means_no_face() {
        let router = Router::new().route(
            "/verify",
            post(|| async { (AxumStatus::UNPROCESSABLE_ENTITY, "Face could not be detected") }),
        );
        let url = spawn_backend(router).await;
        let verifier = HttpFaceVerifier::new(url, Arc::new(SharedHttpClient::default()));

        let err = verifier
            .verify(vec![1], vec![2], &VerificationProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FaceBackendError::NoFaceDetected));
    }
}
