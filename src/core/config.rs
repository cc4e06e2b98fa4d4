//! Scene and worker pool configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Fixed capacities and budgets chosen at scene construction.
///
/// Manifest tables never grow past these bounds; ingest fails with
/// `CapacityExceeded` instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Maximum number of entities (also the length of the GPU entity arrays)
    pub max_entities: u32,
    /// Maximum number of mesh groups
    pub max_mesh_groups: u32,
    /// Maximum number of meshes (also bounds the mesh index array)
    pub max_meshes: u32,
    /// Maximum number of materials
    pub max_materials: u32,
    /// Maximum number of textures
    pub max_textures: u32,
    /// Size of the shared acceleration structure build scratch buffer in bytes
    pub scratch_buffer_size: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            max_entities: 1 << 20,
            max_mesh_groups: 40_000,
            max_meshes: 40_000,
            max_materials: 1 << 16,
            max_textures: 1 << 16,
            scratch_buffer_size: 8_000_000,
        }
    }
}

impl SceneConfig {
    /// Small capacities, handy for tests and tools.
    pub fn small() -> Self {
        Self {
            max_entities: 256,
            max_mesh_groups: 64,
            max_meshes: 256,
            max_materials: 64,
            max_textures: 64,
            scratch_buffer_size: 1 << 20,
        }
    }

    /// Reject capacities that would make the scene unusable.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("max_entities", self.max_entities),
            ("max_mesh_groups", self.max_mesh_groups),
            ("max_meshes", self.max_meshes),
            ("max_materials", self.max_materials),
            ("max_textures", self.max_textures),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        // Custom instance index is 24 bits wide
        if self.max_entities > (1 << 24) {
            return Err(Error::Config(format!(
                "max_entities {} exceeds the 24-bit instance index range",
                self.max_entities
            )));
        }
        if self.scratch_buffer_size == 0 {
            return Err(Error::Config("scratch_buffer_size must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Background worker pool settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub threads: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { threads: 7 }
    }
}

/// Top-level configuration file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scene: SceneConfig,
    pub workers: WorkerPoolConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        log::info!("Loaded config from {}", path.display());
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.scene.validate()?;
        if self.workers.threads == 0 {
            return Err(Error::Config("workers.threads must be greater than zero".into()));
        }
        Ok(())
    }
}
