//! Caller identity and permission checks

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ServiceError, ServiceResult};
use crate::storage::AccessRepository;

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDto {
    pub user_id: String,
}

impl AuthDto {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    AssetRead,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::AssetRead => "asset.read",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct AccessCore {
    repository: Arc<dyn AccessRepository>,
}

impl AccessCore {
    pub fn new(repository: Arc<dyn AccessRepository>) -> Self {
        Self { repository }
    }

    pub async fn has_permission(
        &self,
        auth: &AuthDto,
        permission: Permission,
        id: &str,
    ) -> ServiceResult<bool> {
        let allowed = match permission {
            Permission::AssetRead => self.repository.has_asset_read(&auth.user_id, id).await?,
        };
        Ok(allowed)
    }

    /// `Forbidden` unless `auth` holds `permission` on `id`.
    /// Missing resources are indistinguishable from denied ones.
    pub async fn require_permission(
        &self,
        auth: &AuthDto,
        permission: Permission,
        id: &str,
    ) -> ServiceResult<()> {
        if !self.has_permission(auth, permission, id).await? {
            debug!("User {} denied {} on {}", auth.user_id, permission, id);
            return Err(ServiceError::Forbidden(format!(
                "Not found or no {} access",
                permission
            )));
        }
        Ok(())
    }
}
