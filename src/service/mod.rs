//! Service layer module

pub mod access;
pub mod config_store;
pub mod error;
pub mod smart_info;
pub mod types;

pub use access::{AccessCore, AuthDto, Permission};
pub use config_store::{ConfigRepository, SystemConfig, SystemConfigStore};
pub use error::{ServiceError, ServiceResult};
pub use smart_info::{SmartInfoDeps, SmartInfoService};
pub use types::*;
