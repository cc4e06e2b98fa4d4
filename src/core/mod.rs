//! Core types, errors, configuration and logging

pub mod types;
pub mod error;
pub mod logging;
pub mod config;

pub use types::*;
pub use error::{AssetLoadError, Error, GpuError, LoadManifestError};
pub use config::{EngineConfig, SceneConfig, WorkerPoolConfig};
