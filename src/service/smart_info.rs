//! Smart Info Service - Core business logic
//!
//! Orchestrates CLIP encoding jobs, the embedding dimension migration and
//! on-demand weapon detection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::MachineLearningConfig;
use crate::jobs::{JobHandler, JobItem, JobRepository, JobStatus, QueueFence, QueueName};
use crate::locks::{LockRegistry, EMBEDDING_DIMENSION_LOCK};
use crate::ml::{MachineLearningRepository, MlError, ModelConfig};
use crate::storage::{
    AccessRepository, Asset, AssetRepository, AssetType, PaginationOptions, SmartInfoRepository,
    WithoutProperty,
};

use super::access::{AccessCore, AuthDto, Permission};
use super::config_store::ConfigRepository;
use super::error::{ServiceError, ServiceResult};
use super::types::*;

/// Collaborators of [`SmartInfoService`]
pub struct SmartInfoDeps {
    pub access: Arc<dyn AccessRepository>,
    pub assets: Arc<dyn AssetRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub machine_learning: Arc<dyn MachineLearningRepository>,
    pub repository: Arc<dyn SmartInfoRepository>,
    pub config: Arc<dyn ConfigRepository>,
    pub locks: Arc<LockRegistry>,
}

pub struct SmartInfoService {
    access: AccessCore,
    assets: Arc<dyn AssetRepository>,
    jobs: Arc<dyn JobRepository>,
    machine_learning: Arc<dyn MachineLearningRepository>,
    repository: Arc<dyn SmartInfoRepository>,
    config: Arc<dyn ConfigRepository>,
    locks: Arc<LockRegistry>,
    page_size: i64,
    state: RwLock<DimensionState>,
    /// Held for a whole `init` so fences never overlap
    init_gate: tokio::sync::Mutex<()>,
}

/// Puts the service back to `Stable` however `init` exits
struct StableOnDrop<'a>(&'a RwLock<DimensionState>);

impl Drop for StableOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.write() = DimensionState::Stable;
    }
}

impl SmartInfoService {
    pub fn new(deps: SmartInfoDeps, page_size: i64) -> Self {
        Self {
            access: AccessCore::new(deps.access),
            assets: deps.assets,
            jobs: deps.jobs,
            machine_learning: deps.machine_learning,
            repository: deps.repository,
            config: deps.config,
            locks: deps.locks,
            page_size: page_size.max(1),
            state: RwLock::new(DimensionState::Stable),
            init_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn dimension_state(&self) -> DimensionState {
        *self.state.read()
    }

    fn set_state(&self, state: DimensionState) {
        *self.state.write() = state;
        debug!("Dimension state: {:?}", state);
    }

    async fn machine_learning_config(&self) -> ServiceResult<MachineLearningConfig> {
        Ok(self.config.get_config().await?.machine_learning)
    }

    /// Reconfigure the embedding dimension for the configured CLIP model.
    ///
    /// The smart search queue is paused and drained first so no encode job
    /// overlaps the change; it is resumed afterwards even when the update fails.
    /// Concurrent calls run one after the other.
    pub async fn init(&self) -> ServiceResult<()> {
        let _serial = self.init_gate.lock().await;
        let _stable = StableOnDrop(&self.state);
        self.set_state(DimensionState::Draining);

        let drained = QueueFence::pause(self.jobs.clone(), QueueName::SmartSearch)
            .await?
            .drain()
            .await?;

        drained
            .run(|| async move {
                let model_name = self.machine_learning_config().await?.clip.model_name;
                let updated = self
                    .locks
                    .with_lock(EMBEDDING_DIMENSION_LOCK, || async move {
                        self.set_state(DimensionState::Migrating);
                        info!("Updating CLIP dimension for model {}", model_name);
                        self.repository.init(&model_name).await
                    })
                    .await;
                self.set_state(DimensionState::Stable);
                updated?;
                Ok::<(), ServiceError>(())
            })
            .await
    }

    /// Trigger a full or incremental encode pass
    pub async fn queue_encode_clip(&self, force: bool) -> ServiceResult<()> {
        self.jobs.queue(JobItem::QueueSmartSearch { force }).await?;
        Ok(())
    }

    /// Enqueue one encode job per asset, page by page
    pub async fn handle_queue_encode_clip(&self, force: bool) -> ServiceResult<JobStatus> {
        let machine_learning = self.machine_learning_config().await?;
        if !machine_learning.enabled || !machine_learning.clip.enabled {
            return Ok(JobStatus::Skipped);
        }

        let mut page = PaginationOptions::first(self.page_size);
        let mut queued = 0;
        loop {
            let assets = if force {
                self.assets.get_all(page.clone()).await?
            } else {
                self.assets
                    .get_without(page.clone(), WithoutProperty::SmartSearch)
                    .await?
            };

            let jobs: Vec<JobItem> = assets
                .items
                .iter()
                .map(|asset| JobItem::SmartSearch { id: asset.id.clone() })
                .collect();
            if !jobs.is_empty() {
                queued += jobs.len();
                self.jobs.queue_all(jobs).await?;
            }

            match assets.items.last() {
                Some(last) if assets.has_next_page => page = page.after(last),
                _ => break,
            }
        }

        info!("Queued {} smart search jobs (force: {})", queued, force);
        Ok(JobStatus::Success)
    }

    /// Compute and store the CLIP embedding of one asset
    pub async fn handle_encode_clip(&self, id: &str) -> ServiceResult<JobStatus> {
        let machine_learning = self.machine_learning_config().await?;
        if !machine_learning.enabled || !machine_learning.clip.enabled {
            return Ok(JobStatus::Skipped);
        }

        let Some(asset) = self.assets.get_by_ids(&[id.to_string()]).await?.into_iter().next() else {
            warn!("Asset {} not found, skipping smart search", id);
            return Ok(JobStatus::Failed);
        };

        let Some(resize_path) = asset.resize_path.as_deref() else {
            debug!("Asset {} has no resize path yet", asset.id);
            return Ok(JobStatus::NotReady);
        };

        let embedding = match self
            .machine_learning
            .encode_image(
                &machine_learning.url,
                Path::new(resize_path),
                &ModelConfig::from(&machine_learning.clip),
            )
            .await
        {
            Ok(embedding) => embedding,
            Err(MlError::ConfigDisabled { model }) => {
                debug!("{} disabled, skipping asset {}", model, asset.id);
                return Ok(JobStatus::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        self.wait_for_dimension().await;
        self.repository.upsert(&asset.id, &embedding).await?;

        Ok(JobStatus::Success)
    }

    async fn wait_for_dimension(&self) {
        if self.locks.is_busy(EMBEDDING_DIMENSION_LOCK) {
            debug!("Waiting for CLIP dimension size to be updated");
            self.locks.wait(EMBEDDING_DIMENSION_LOCK).await;
        }
    }

    /// Run weapon detection on one asset and return the detections as-is
    pub async fn handle_detect_weapons(
        &self,
        auth: &AuthDto,
        id: &str,
    ) -> ServiceResult<WeaponsDetectResponse> {
        self.access
            .require_permission(auth, Permission::AssetRead, id)
            .await?;

        let machine_learning = self.machine_learning_config().await?;
        if !machine_learning.enabled || !machine_learning.weapons_detection.enabled {
            return Err(ServiceError::bad_request("Machine learning is disabled"));
        }

        let asset = self
            .assets
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::bad_request("Asset not found"))?;

        let resize_path = asset
            .resize_path
            .as_deref()
            .ok_or_else(|| ServiceError::bad_request("Asset has no image file path"))?;

        let model = ModelConfig::from(&machine_learning.weapons_detection)
            .with_option("assetId", asset.id.as_str());

        let data = match asset.asset_type {
            AssetType::Video => {
                self.machine_learning
                    .detect_weapons_in_video(
                        &machine_learning.url,
                        Path::new(&asset.original_path),
                        &model,
                    )
                    .await?
            }
            _ => {
                self.machine_learning
                    .detect_weapons_in_image(&machine_learning.url, Path::new(resize_path), &model)
                    .await?
            }
        };

        info!("Detected {} weapons in asset {}", data.len(), asset.id);
        Ok(WeaponsDetectResponse {
            id: id.to_string(),
            data,
        })
    }

    /// Rank the caller's assets against a text query
    pub async fn search_smart(
        &self,
        auth: &AuthDto,
        query: &str,
        limit: usize,
    ) -> ServiceResult<SmartSearchResponse> {
        let machine_learning = self.machine_learning_config().await?;
        if !machine_learning.enabled || !machine_learning.clip.enabled {
            return Err(ServiceError::bad_request("Smart search is not enabled"));
        }
        if query.trim().is_empty() {
            return Err(ServiceError::bad_request("Query must not be empty"));
        }

        let embedding = self
            .machine_learning
            .encode_text(&machine_learning.url, query, &ModelConfig::from(&machine_learning.clip))
            .await?;

        self.wait_for_dimension().await;
        let matches = self
            .repository
            .search_clip(&auth.user_id, &embedding, limit)
            .await?;

        let ids: Vec<String> = matches.iter().map(|m| m.asset_id.clone()).collect();
        let mut assets: HashMap<String, Asset> = self
            .assets
            .get_by_ids(&ids)
            .await?
            .into_iter()
            .map(|asset| (asset.id.clone(), asset))
            .collect();

        let items = matches
            .into_iter()
            .filter_map(|m| {
                assets.remove(&m.asset_id).map(|asset| SmartSearchHit {
                    asset,
                    similarity: m.similarity,
                })
            })
            .collect();

        Ok(SmartSearchResponse { items })
    }

    /// Replace the machine learning config. The caller re-runs [`Self::init`]
    /// when the CLIP model changed.
    pub async fn update_machine_learning(
        &self,
        config: MachineLearningConfig,
    ) -> ServiceResult<ConfigUpdate> {
        if config.enabled && config.url.trim().is_empty() {
            return Err(ServiceError::bad_request("Machine learning URL must not be empty"));
        }
        if config.clip.model_name.trim().is_empty() {
            return Err(ServiceError::bad_request("CLIP model name must not be empty"));
        }

        let previous = self.machine_learning_config().await?;
        let updated = self.config.update_machine_learning(config).await?;
        let clip_model_changed =
            previous.clip.model_name != updated.machine_learning.clip.model_name;

        Ok(ConfigUpdate {
            config: updated,
            clip_model_changed,
        })
    }

    /// Get health status
    pub async fn health(&self) -> ServiceResult<HealthResult> {
        let machine_learning = self.machine_learning_config().await?;

        let mut queues = HashMap::new();
        for queue in QueueName::ALL {
            queues.insert(queue.to_string(), self.jobs.queue_stats(queue).await?);
        }

        Ok(HealthResult {
            healthy: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            machine_learning_enabled: machine_learning.enabled,
            dimension_state: self.dimension_state(),
            queues,
        })
    }
}

#[async_trait]
impl JobHandler for SmartInfoService {
    async fn handle(&self, item: JobItem) -> Result<JobStatus> {
        let status = match item {
            JobItem::QueueSmartSearch { force } => self.handle_queue_encode_clip(force).await?,
            JobItem::SmartSearch { id } => self.handle_encode_clip(&id).await?,
        };
        Ok(status)
    }
}
