//! Error types for machine learning dispatch

use reqwest::StatusCode;
use thiserror::Error;

pub type MlResult<T> = Result<T, MlError>;

#[derive(Debug, Error)]
pub enum MlError {
    /// The model (or the whole feature) is switched off
    #[error("{model} is not enabled")]
    ConfigDisabled { model: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Machine learning request to \"{url}\" failed with {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Machine learning request{} failed with status {}: {status_text}", for_label(.model_label), .status.as_u16())]
    InferenceService {
        status: StatusCode,
        status_text: String,
        model_label: Option<String>,
    },

    #[error("Failed to decode machine learning response from \"{url}\": {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

fn for_label(label: &Option<String>) -> String {
    label.as_ref().map(|l| format!(" for {}", l)).unwrap_or_default()
}

impl MlError {
    /// Whether the failure happened on the remote side or while reaching it
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            MlError::Transport { .. } | MlError::InferenceService { .. } | MlError::Decode { .. }
        )
    }
}
