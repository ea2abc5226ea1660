//! Storage abstraction traits
//!
//! Interfaces for asset lookup, embedding persistence and access checks.
//! The service only sees these traits; the SQLite adapter implements all three.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetType {
    Image,
    Video,
    Audio,
    Other,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Image => "IMAGE",
            AssetType::Video => "VIDEO",
            AssetType::Audio => "AUDIO",
            AssetType::Other => "OTHER",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        Ok(match value {
            "IMAGE" => AssetType::Image,
            "VIDEO" => AssetType::Video,
            "AUDIO" => AssetType::Audio,
            "OTHER" => AssetType::Other,
            other => bail!("Unknown asset type {}", other),
        })
    }
}

/// A stored media asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub original_path: String,
    /// Downscaled rendition used as model input; absent until thumbnailing ran
    pub resize_path: Option<String>,
    pub created_at: i64,
}

/// Position after the last asset of a page, in `(created_at, id)` order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: i64,
    pub id: String,
}

/// Keyset pagination. Pages stay exhaustive while rows before the cursor
/// leave the result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationOptions {
    pub take: i64,
    pub after: Option<PageCursor>,
}

impl PaginationOptions {
    pub fn first(take: i64) -> Self {
        Self { take, after: None }
    }

    /// The page following `last`
    pub fn after(&self, last: &Asset) -> Self {
        Self {
            take: self.take,
            after: Some(PageCursor {
                created_at: last.created_at,
                id: last.id.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub has_next_page: bool,
}

/// Derived data an asset may be missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithoutProperty {
    SmartSearch,
}

/// Smart search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub asset_id: String,
    pub similarity: f32,
}

#[async_trait]
pub trait AssetRepository: Send + Sync + 'static {
    /// Assets with the given ids; unknown ids are skipped
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Asset>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Asset>>;

    async fn get_all(&self, page: PaginationOptions) -> Result<Paginated<Asset>>;

    async fn get_without(
        &self,
        page: PaginationOptions,
        property: WithoutProperty,
    ) -> Result<Paginated<Asset>>;
}

/// CLIP embedding storage
/// Every stored embedding has the dimension of the model passed to the last `init`.
#[async_trait]
pub trait SmartInfoRepository: Send + Sync + 'static {
    /// Adopt the dimension of `model_name`. Existing embeddings of another
    /// dimension are discarded.
    async fn init(&self, model_name: &str) -> Result<()>;

    async fn upsert(&self, asset_id: &str, embedding: &[f32]) -> Result<()>;

    /// Assets of `owner_id` ranked by cosine similarity, best first
    async fn search_clip(
        &self,
        owner_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchMatch>>;
}

#[async_trait]
pub trait AccessRepository: Send + Sync + 'static {
    async fn has_asset_read(&self, user_id: &str, asset_id: &str) -> Result<bool>;
}
