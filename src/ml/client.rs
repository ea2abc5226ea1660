//! HTTP client for the remote inference service

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::{MlError, MlResult};
use super::request::RequestBuilder;
use super::types::*;

const PREDICT_PATH: &str = "predict";

/// Typed operations offered by the inference service.
/// `url` is the service base URL, re-read from config by callers on each use.
#[async_trait]
pub trait MachineLearningRepository: Send + Sync + 'static {
    async fn encode_image(&self, url: &str, image_path: &Path, config: &ModelConfig) -> MlResult<Vec<f32>>;

    async fn encode_text(&self, url: &str, text: &str, config: &ModelConfig) -> MlResult<Vec<f32>>;

    async fn detect_faces(
        &self,
        url: &str,
        image_path: &Path,
        config: &ModelConfig,
    ) -> MlResult<Vec<DetectFaceResult>>;

    async fn detect_weapons_in_image(
        &self,
        url: &str,
        image_path: &Path,
        config: &ModelConfig,
    ) -> MlResult<Vec<WeaponDetection>>;

    async fn detect_weapons_in_video(
        &self,
        url: &str,
        video_path: &Path,
        config: &ModelConfig,
    ) -> MlResult<Vec<WeaponDetection>>;
}

/// reqwest-backed inference client
pub struct MachineLearningClient {
    client: Client,
    builder: RequestBuilder,
}

impl MachineLearningClient {
    pub fn new(builder: RequestBuilder, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, builder })
    }

    /// Send one prediction request and decode the JSON answer. No retries.
    pub async fn predict<T: DeserializeOwned>(
        &self,
        url: &str,
        input: &ModelInput,
        config: &ModelConfig,
    ) -> MlResult<T> {
        let payload = self.builder.build(input, config).await?;
        let endpoint = format!("{}/{}", url.trim_end_matches('/'), PREDICT_PATH);
        debug!(
            "Dispatching {} request for model {} to {}",
            input.kind(),
            config.model_name,
            endpoint
        );

        let res = self
            .client
            .post(&endpoint)
            .multipart(payload.into_form())
            .send()
            .await
            .map_err(|source| MlError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = res.status();
        if status.as_u16() >= 400 {
            return Err(MlError::InferenceService {
                status,
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                model_label: config.model_type.map(|t| t.label()),
            });
        }

        res.json::<T>().await.map_err(|source| MlError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl MachineLearningRepository for MachineLearningClient {
    async fn encode_image(&self, url: &str, image_path: &Path, config: &ModelConfig) -> MlResult<Vec<f32>> {
        let config = config
            .clone()
            .with_model_type(ModelType::Clip)
            .with_mode(ModelMode::Clip(ClipMode::Vision));
        self.predict(url, &ModelInput::vision(image_path), &config).await
    }

    async fn encode_text(&self, url: &str, text: &str, config: &ModelConfig) -> MlResult<Vec<f32>> {
        let config = config
            .clone()
            .with_model_type(ModelType::Clip)
            .with_mode(ModelMode::Clip(ClipMode::Text));
        self.predict(url, &ModelInput::text(text), &config).await
    }

    async fn detect_faces(
        &self,
        url: &str,
        image_path: &Path,
        config: &ModelConfig,
    ) -> MlResult<Vec<DetectFaceResult>> {
        let config = config.clone().with_model_type(ModelType::FacialRecognition);
        self.predict(url, &ModelInput::vision(image_path), &config).await
    }

    async fn detect_weapons_in_image(
        &self,
        url: &str,
        image_path: &Path,
        config: &ModelConfig,
    ) -> MlResult<Vec<WeaponDetection>> {
        let config = config
            .clone()
            .with_model_type(ModelType::WeaponsDetection)
            .with_mode(ModelMode::Media(MediaMode::Image));
        let detections: OneOrMany<WeaponDetection> =
            self.predict(url, &ModelInput::vision(image_path), &config).await?;
        Ok(detections.into())
    }

    async fn detect_weapons_in_video(
        &self,
        url: &str,
        video_path: &Path,
        config: &ModelConfig,
    ) -> MlResult<Vec<WeaponDetection>> {
        let config = config
            .clone()
            .with_model_type(ModelType::WeaponsDetection)
            .with_mode(ModelMode::Media(MediaMode::Video));
        let detections: OneOrMany<WeaponDetection> =
            self.predict(url, &ModelInput::video(video_path), &config).await?;
        Ok(detections.into())
    }
}
