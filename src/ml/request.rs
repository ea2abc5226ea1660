//! Prediction payload builder
//!
//! Turns a [`ModelInput`] and its [`ModelConfig`] into the multipart body the
//! inference service expects. Images travel as bytes, text as a plain field,
//! and videos are copied into a directory shared with the inference service so
//! only their path crosses the wire.

use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::debug;

use super::error::{MlError, MlResult};
use super::types::{ModelConfig, ModelInput, ModelType};

/// Staging directory mounted by the inference service
pub const DEFAULT_STAGING_DIR: &str = "/usr/src/app/ml-results";

/// The single media field of a payload
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadBody {
    Image(Vec<u8>),
    VideoFilePath(String),
    Text(String),
}

impl PayloadBody {
    /// Multipart field name
    pub fn field_name(&self) -> &'static str {
        match self {
            PayloadBody::Image(_) => "image",
            PayloadBody::VideoFilePath(_) => "videoFilePath",
            PayloadBody::Text(_) => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub model_name: String,
    pub model_type: Option<ModelType>,
    /// JSON encoded remainder of the model config
    pub options: String,
    pub body: PayloadBody,
}

impl Payload {
    pub fn into_form(self) -> Form {
        let mut form = Form::new().text("modelName", self.model_name);
        if let Some(model_type) = self.model_type {
            form = form.text("modelType", model_type.as_str());
        }
        form = form.text("options", self.options);

        let field = self.body.field_name();
        match self.body {
            PayloadBody::Image(bytes) => form.part(field, Part::bytes(bytes).file_name("blob")),
            PayloadBody::VideoFilePath(path) => form.text(field, path),
            PayloadBody::Text(text) => form.text(field, text),
        }
    }
}

/// Builds prediction payloads
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    staging_dir: PathBuf,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_STAGING_DIR)
    }
}

impl RequestBuilder {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub async fn build(&self, input: &ModelInput, config: &ModelConfig) -> MlResult<Payload> {
        if !config.enabled {
            let model = config
                .model_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_else(|| config.model_name.clone());
            return Err(MlError::ConfigDisabled { model });
        }

        let mut options = config.options.clone();
        if let Some(mode) = config.mode {
            options.insert("mode".to_string(), Value::from(mode.as_str()));
        }
        let options = Value::Object(options).to_string();

        let body = match input {
            ModelInput::Vision { image_path } => {
                let bytes = tokio::fs::read(image_path).await?;
                PayloadBody::Image(bytes)
            }
            ModelInput::Video { video_path } => {
                let staged = self.stage_video(video_path).await?;
                PayloadBody::VideoFilePath(staged.to_string_lossy().into_owned())
            }
            ModelInput::Text { text } => PayloadBody::Text(text.clone()),
        };

        Ok(Payload {
            model_name: config.model_name.clone(),
            model_type: config.model_type,
            options,
            body,
        })
    }

    /// Copy a video into the staging directory under its base name. The copy
    /// is left in place for the inference service.
    async fn stage_video(&self, video_path: &Path) -> MlResult<PathBuf> {
        let file_name = video_path.file_name().ok_or_else(|| {
            MlError::InvalidInput(format!("video path {} has no file name", video_path.display()))
        })?;
        let staged = self.staging_dir.join(file_name);

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let bytes = tokio::fs::copy(video_path, &staged).await?;
        debug!("Staged video {} -> {} ({} bytes)", video_path.display(), staged.display(), bytes);

        Ok(staged)
    }
}
