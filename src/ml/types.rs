//! Machine learning request and result types

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::MlError;

/// Model families understood by the inference service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    FacialRecognition,
    Clip,
    WeaponsDetection,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::FacialRecognition => "facial-recognition",
            ModelType::Clip => "clip",
            ModelType::WeaponsDetection => "weapons-detection",
        }
    }

    /// Human readable label used in error messages
    pub fn label(&self) -> String {
        self.as_str().replace('-', " ")
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipMode {
    Vision,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    Image,
    Video,
}

impl ClipMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipMode::Vision => "vision",
            ClipMode::Text => "text",
        }
    }
}

impl MediaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaMode::Image => "image",
            MediaMode::Video => "video",
        }
    }
}

/// Either a CLIP mode or a media mode, serialized as its bare string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelMode {
    Clip(ClipMode),
    Media(MediaMode),
}

impl ModelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelMode::Clip(mode) => mode.as_str(),
            ModelMode::Media(mode) => mode.as_str(),
        }
    }
}

/// Per-request model configuration.
///
/// `options` holds everything the inference service should receive besides
/// the model identity; `mode` is folded into it when the payload is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub enabled: bool,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<ModelType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModelMode>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl ModelConfig {
    pub fn new(enabled: bool, model_name: &str) -> Self {
        Self {
            enabled,
            model_name: model_name.to_string(),
            model_type: None,
            mode: None,
            options: Map::new(),
        }
    }

    pub fn with_model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = Some(model_type);
        self
    }

    pub fn with_mode(mut self, mode: ModelMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }
}

/// Input for a single prediction; exactly one modality per request
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInput {
    Vision { image_path: PathBuf },
    Text { text: String },
    Video { video_path: PathBuf },
}

impl ModelInput {
    pub fn vision(image_path: impl Into<PathBuf>) -> Self {
        ModelInput::Vision { image_path: image_path.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        ModelInput::Text { text: text.into() }
    }

    pub fn video(video_path: impl Into<PathBuf>) -> Self {
        ModelInput::Video { video_path: video_path.into() }
    }

    /// Build an input from loosely populated fields. Exactly one must be set.
    pub fn from_parts(
        image_path: Option<PathBuf>,
        text: Option<String>,
        video_path: Option<PathBuf>,
    ) -> Result<Self, MlError> {
        match (image_path, text, video_path) {
            (Some(image_path), None, None) => Ok(ModelInput::Vision { image_path }),
            (None, Some(text), None) => Ok(ModelInput::Text { text }),
            (None, None, Some(video_path)) => Ok(ModelInput::Video { video_path }),
            (None, None, None) => Err(MlError::InvalidInput("no input provided".to_string())),
            _ => Err(MlError::InvalidInput(
                "exactly one of image, text or video must be provided".to_string(),
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModelInput::Vision { .. } => "image",
            ModelInput::Text { .. } => "text",
            ModelInput::Video { .. } => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectFaceResult {
    pub image_width: u32,
    pub image_height: u32,
    pub bounding_box: BoundingBox,
    pub score: f32,
    pub embedding: Vec<f32>,
}

/// What the detector produced for a hit: an inline annotated image or a file
/// written next to the staged input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetectionArtifact {
    Image { image: String },
    File {
        #[serde(rename = "filePath")]
        file_path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaponDetection {
    #[serde(flatten)]
    pub artifact: DetectionArtifact,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_mode: Option<MediaMode>,
}

/// The detector answers with a single object for some inputs and a list for
/// others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}
