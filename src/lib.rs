//! Smart Info Service Library

pub mod config;
pub mod ml;
pub mod locks;
pub mod jobs;
pub mod storage;
pub mod service;
pub mod api;
pub mod utils;

pub use config::Config;
