//! Machine learning dispatch
//!
//! Builds prediction payloads and sends them to the remote inference service:
//! - image, text and video inputs
//! - CLIP embeddings, face detection and weapon detection
//! - typed errors for disabled models, transport and service failures

pub mod types;
pub mod error;
pub mod request;
pub mod client;

pub use client::{MachineLearningClient, MachineLearningRepository};
pub use error::{MlError, MlResult};
pub use request::RequestBuilder;
pub use types::*;
