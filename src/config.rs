//! Smart info service configuration

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ml::request::DEFAULT_STAGING_DIR;
use crate::ml::types::{ModelConfig, ModelType};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub machine_learning: MachineLearningConfig,
    pub machine_learning_client: MachineLearningClientConfig,
    pub jobs: JobsConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub rest_port: u16,
}

/// Machine learning settings. Re-read by every job handler, so updates made
/// through the config store take effect on the next job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MachineLearningConfig {
    pub enabled: bool,
    pub url: String,
    pub clip: ClipConfig,
    pub facial_recognition: RecognitionConfig,
    pub weapons_detection: WeaponsDetectionConfig,
}

/// HTTP client settings, fixed at startup
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MachineLearningClientConfig {
    /// Shared directory the inference service reads staged videos from
    pub staging_dir: PathBuf,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClipConfig {
    pub enabled: bool,
    pub model_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecognitionConfig {
    pub enabled: bool,
    pub model_name: String,
    pub min_score: f32,
    pub max_distance: f32,
    pub min_faces: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WeaponsDetectionConfig {
    pub enabled: bool,
    pub model_name: String,
    pub min_score: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Number of worker tasks per queue
    pub concurrency: usize,
    /// Assets fetched per page when queueing a full pass
    pub page_size: i64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// API key -> user id
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> String {
        std::env::var("SMARTINFO_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }
}

impl From<&ClipConfig> for ModelConfig {
    fn from(clip: &ClipConfig) -> Self {
        ModelConfig::new(clip.enabled, &clip.model_name).with_model_type(ModelType::Clip)
    }
}

impl From<&RecognitionConfig> for ModelConfig {
    fn from(recognition: &RecognitionConfig) -> Self {
        ModelConfig::new(recognition.enabled, &recognition.model_name)
            .with_model_type(ModelType::FacialRecognition)
            .with_option("minScore", recognition.min_score)
            .with_option("maxDistance", recognition.max_distance)
            .with_option("minFaces", recognition.min_faces)
    }
}

impl From<&WeaponsDetectionConfig> for ModelConfig {
    fn from(weapons: &WeaponsDetectionConfig) -> Self {
        ModelConfig::new(weapons.enabled, &weapons.model_name)
            .with_model_type(ModelType::WeaponsDetection)
            .with_option("minScore", weapons.min_score)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            machine_learning: MachineLearningConfig::default(),
            machine_learning_client: MachineLearningClientConfig::default(),
            jobs: JobsConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { rest_port: 3001 }
    }
}

impl Default for MachineLearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://immich-machine-learning:3003".to_string(),
            clip: ClipConfig::default(),
            facial_recognition: RecognitionConfig::default(),
            weapons_detection: WeaponsDetectionConfig::default(),
        }
    }
}

impl Default for MachineLearningClientConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            request_timeout_secs: 60,
        }
    }
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_name: "ViT-B-32__openai".to_string(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_name: "buffalo_l".to_string(),
            min_score: 0.7,
            max_distance: 0.6,
            min_faces: 3,
        }
    }
}

impl Default for WeaponsDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_name: "threat-detector".to_string(),
            min_score: 0.2,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            page_size: 1000,
            max_attempts: 3,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/smartinfo.db"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [machine_learning]
            url = "http://ml:3003"

            [machine_learning.clip]
            modelName = "ViT-L-14__openai"

            [machine_learning_client]
            request_timeout_secs = 5

            [auth.api_keys]
            secret = "user-1"
            "#,
        )
        .unwrap();

        assert_eq!(config.machine_learning.url, "http://ml:3003");
        assert_eq!(config.machine_learning.clip.model_name, "ViT-L-14__openai");
        assert!(config.machine_learning.clip.enabled);
        assert_eq!(config.jobs.page_size, 1000);
        assert_eq!(config.auth.api_keys.get("secret").map(String::as_str), Some("user-1"));
        assert_eq!(config.server.rest_port, 3001);
        assert_eq!(config.machine_learning_client.request_timeout_secs, 5);
        assert_eq!(
            config.machine_learning_client.staging_dir,
            PathBuf::from("/usr/src/app/ml-results")
        );
    }

    #[test]
    fn test_weapons_config_carries_min_score() {
        let model: ModelConfig = (&WeaponsDetectionConfig::default()).into();
        assert_eq!(model.model_type, Some(ModelType::WeaponsDetection));
        assert_eq!(model.options.get("minScore").and_then(|v| v.as_f64()), Some(0.2f32 as f64));
    }
}
