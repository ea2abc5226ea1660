//! SQLite storage implementation

use std::path::Path;

use async_trait::async_trait;
use sqlx::{sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow}, Row};
use anyhow::{anyhow, bail, Result, Context};
use tracing::{info, debug};

use super::traits::{
    AccessRepository, Asset, AssetRepository, AssetType, PaginationOptions, Paginated,
    SearchMatch, SmartInfoRepository, WithoutProperty,
};
use crate::utils::math::cosine_similarity;

const CLIP_DIMENSION_KEY: &str = "clip_dimension";

const ASSET_COLUMNS: &str = "a.id, a.owner_id, a.asset_type, a.original_path, a.resize_path, a.created_at";

/// Embedding length produced by a known CLIP model
pub fn clip_dimension(model_name: &str) -> Option<usize> {
    let name = model_name.trim_start_matches("immich-app/");
    let dimension = match name {
        "RN50__openai" | "RN50__yfcc15m" | "RN50__cc12m" => 1024,
        "RN101__openai" | "RN101__yfcc15m" => 512,
        "RN50x4__openai" => 640,
        "RN50x16__openai" => 768,
        "RN50x64__openai" => 1024,
        "ViT-B-32__openai"
        | "ViT-B-32__laion2b_e16"
        | "ViT-B-32__laion400m_e31"
        | "ViT-B-32__laion400m_e32"
        | "ViT-B-32__laion2b-s34b-b79k"
        | "ViT-B-16__openai"
        | "ViT-B-16__laion400m_e31"
        | "ViT-B-16__laion400m_e32"
        | "XLM-Roberta-Large-Vit-B-32" => 512,
        "ViT-B-16-plus-240__laion400m_e31"
        | "ViT-B-16-plus-240__laion400m_e32"
        | "XLM-Roberta-Large-Vit-B-16Plus" => 640,
        "ViT-L-14__openai"
        | "ViT-L-14__laion400m_e31"
        | "ViT-L-14__laion400m_e32"
        | "ViT-L-14__laion2b-s32b-b82k"
        | "ViT-L-14-336__openai"
        | "XLM-Roberta-Large-Vit-L-14"
        | "LABSE-Vit-L-14" => 768,
        "ViT-H-14__laion2b-s32b-b79k" | "ViT-g-14__laion2b-s12b-b42k" => 1024,
        "XLM-Roberta-Large-ViT-H-14__frozen_laion5b_s13b_b90k" => 1024,
        _ => return None,
    };
    Some(dimension)
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn asset_from_row(row: &SqliteRow) -> Result<Asset> {
    let asset_type: String = row.try_get("asset_type")?;
    Ok(Asset {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        asset_type: AssetType::parse(&asset_type)?,
        original_path: row.try_get("original_path")?,
        resize_path: row.try_get("resize_path")?,
        created_at: row.try_get("created_at")?,
    })
}

fn keyset_clause(page: &PaginationOptions) -> &'static str {
    match page.after {
        Some(_) => "(a.created_at, a.id) > (?, ?)",
        None => "1 = 1",
    }
}

fn paginate(rows: Vec<SqliteRow>, page: &PaginationOptions) -> Result<Paginated<Asset>> {
    let mut items = rows.iter().map(asset_from_row).collect::<Result<Vec<_>>>()?;
    let has_next_page = items.len() as i64 > page.take;
    items.truncate(page.take.max(0) as usize);
    Ok(Paginated { items, has_next_page })
}

/// SQLite-backed assets, embeddings and access checks
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", db_path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let storage = Self { pool };
        storage.initialize().await?;

        Ok(storage)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                asset_type TEXT NOT NULL,
                original_path TEXT NOT NULL,
                resize_path TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_assets_owner_id ON assets(owner_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS smart_search (
                asset_id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS system_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("SQLite database initialized");
        Ok(())
    }

    /// Dimension recorded by the last `init`
    pub async fn dimension(&self) -> Result<Option<usize>> {
        let row = sqlx::query("SELECT value FROM system_metadata WHERE key = ?")
            .bind(CLIP_DIMENSION_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let value: String = row.try_get("value")?;
                let dimension = value
                    .parse()
                    .with_context(|| format!("Invalid stored CLIP dimension {:?}", value))?;
                Ok(Some(dimension))
            }
            None => Ok(None),
        }
    }

    pub async fn insert_asset(&self, asset: &Asset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assets (id, owner_id, asset_type, original_path, resize_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                asset_type = excluded.asset_type,
                original_path = excluded.original_path,
                resize_path = excluded.resize_path
            "#,
        )
        .bind(&asset.id)
        .bind(&asset.owner_id)
        .bind(asset.asset_type.as_str())
        .bind(&asset.original_path)
        .bind(&asset.resize_path)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved asset: {}", asset.id);
        Ok(())
    }

    /// Run a page query built with [`keyset_clause`]; fetches one extra row
    /// to detect a following page
    async fn fetch_page(&self, sql: &str, page: PaginationOptions) -> Result<Paginated<Asset>> {
        let mut query = sqlx::query(sql);
        if let Some(cursor) = &page.after {
            query = query.bind(cursor.created_at).bind(cursor.id.clone());
        }
        let rows = query.bind(page.take + 1).fetch_all(&self.pool).await?;

        paginate(rows, &page)
    }

    pub async fn count_embeddings(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM smart_search")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }
}

#[async_trait]
impl AssetRepository for SqliteStorage {
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Asset>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT {} FROM assets a WHERE a.id IN ({})", ASSET_COLUMNS, placeholders);
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(asset_from_row).collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Asset>> {
        let sql = format!("SELECT {} FROM assets a WHERE a.id = ?", ASSET_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(asset_from_row).transpose()
    }

    async fn get_all(&self, page: PaginationOptions) -> Result<Paginated<Asset>> {
        let sql = format!(
            "SELECT {} FROM assets a WHERE {} ORDER BY a.created_at, a.id LIMIT ?",
            ASSET_COLUMNS,
            keyset_clause(&page)
        );
        self.fetch_page(&sql, page).await
    }

    async fn get_without(
        &self,
        page: PaginationOptions,
        property: WithoutProperty,
    ) -> Result<Paginated<Asset>> {
        let sql = match property {
            WithoutProperty::SmartSearch => format!(
                r#"
                SELECT {} FROM assets a
                LEFT JOIN smart_search s ON s.asset_id = a.id
                WHERE s.asset_id IS NULL AND {}
                ORDER BY a.created_at, a.id
                LIMIT ?
                "#,
                ASSET_COLUMNS,
                keyset_clause(&page)
            ),
        };
        self.fetch_page(&sql, page).await
    }
}

#[async_trait]
impl SmartInfoRepository for SqliteStorage {
    async fn init(&self, model_name: &str) -> Result<()> {
        let dimension = clip_dimension(model_name)
            .ok_or_else(|| anyhow!("Unknown CLIP model {}", model_name))?;

        let current = self.dimension().await?;
        if current == Some(dimension) {
            debug!("CLIP dimension already {} for model {}", dimension, model_name);
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let cleared = sqlx::query("DELETE FROM smart_search")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(
            r#"
            INSERT INTO system_metadata (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CLIP_DIMENSION_KEY)
        .bind(dimension.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            "CLIP dimension changed from {:?} to {} for model {}, cleared {} embeddings",
            current, dimension, model_name, cleared
        );
        Ok(())
    }

    async fn upsert(&self, asset_id: &str, embedding: &[f32]) -> Result<()> {
        match self.dimension().await? {
            Some(dimension) if dimension == embedding.len() => {}
            Some(dimension) => bail!(
                "Embedding for asset {} has dimension {}, expected {}",
                asset_id,
                embedding.len(),
                dimension
            ),
            None => bail!("CLIP dimension is not initialized"),
        }

        sqlx::query(
            r#"
            INSERT INTO smart_search (asset_id, embedding, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(asset_id) DO UPDATE SET
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(asset_id)
        .bind(encode_embedding(embedding))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!("Saved embedding for asset {}", asset_id);
        Ok(())
    }

    async fn search_clip(
        &self,
        owner_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchMatch>> {
        // no vector index in SQLite, rank in memory
        let rows = sqlx::query(
            r#"
            SELECT s.asset_id, s.embedding
            FROM smart_search s
            JOIN assets a ON a.id = s.asset_id
            WHERE a.owner_id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut results = rows
            .iter()
            .map(|row| {
                let stored: Vec<u8> = row.try_get("embedding")?;
                Ok(SearchMatch {
                    asset_id: row.try_get("asset_id")?,
                    similarity: cosine_similarity(embedding, &decode_embedding(&stored)),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(limit);

        Ok(results)
    }
}

#[async_trait]
impl AccessRepository for SqliteStorage {
    async fn has_asset_read(&self, user_id: &str, asset_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM assets WHERE id = ? AND owner_id = ?")
            .bind(asset_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }
}
