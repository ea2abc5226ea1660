//! Storage module for assets and smart search embeddings

pub mod traits;
pub mod sqlite;

pub use traits::{
    AccessRepository, Asset, AssetRepository, AssetType, PageCursor, PaginationOptions,
    Paginated, SearchMatch, SmartInfoRepository, WithoutProperty,
};
pub use sqlite::{clip_dimension, SqliteStorage};
