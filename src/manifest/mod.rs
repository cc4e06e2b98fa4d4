//! Append-only manifest tables: the CPU-side ground truth for all scene data

pub mod table;
pub mod entries;

pub use table::ManifestTable;
pub use entries::{
    AssetRecord, MaterialEntry, MeshEntry, MeshGroupEntry, TextureEntry, TextureKind,
};

use crate::core::config::SceneConfig;

/// All manifest tables of one scene.
pub struct Manifest {
    pub textures: ManifestTable<TextureEntry>,
    pub materials: ManifestTable<MaterialEntry>,
    pub mesh_groups: ManifestTable<MeshGroupEntry>,
    pub meshes: ManifestTable<MeshEntry>,
    /// Mesh manifest indices, grouped per mesh group
    pub mesh_indices: ManifestTable<u32>,
    pub assets: Vec<AssetRecord>,
}

/// Row counts of every table, used to verify atomic ingest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManifestSizes {
    pub textures: usize,
    pub materials: usize,
    pub mesh_groups: usize,
    pub meshes: usize,
    pub mesh_indices: usize,
    pub assets: usize,
}

impl Manifest {
    pub fn new(config: &SceneConfig) -> Self {
        Self {
            textures: ManifestTable::new("texture", config.max_textures as usize),
            materials: ManifestTable::new("material", config.max_materials as usize),
            mesh_groups: ManifestTable::new("mesh group", config.max_mesh_groups as usize),
            meshes: ManifestTable::new("mesh", config.max_meshes as usize),
            mesh_indices: ManifestTable::new("mesh index", config.max_meshes as usize),
            assets: Vec::new(),
        }
    }

    pub fn sizes(&self) -> ManifestSizes {
        ManifestSizes {
            textures: self.textures.len(),
            materials: self.materials.len(),
            mesh_groups: self.mesh_groups.len(),
            meshes: self.meshes.len(),
            mesh_indices: self.mesh_indices.len(),
            assets: self.assets.len(),
        }
    }

    /// Consume all growth since the last sync.
    pub fn mark_synced(&mut self) {
        self.textures.mark_synced();
        self.materials.mark_synced();
        self.mesh_groups.mark_synced();
        self.meshes.mark_synced();
        self.mesh_indices.mark_synced();
    }

    /// Mesh manifest indices belonging to `group`.
    pub fn group_meshes(&self, group: u32) -> &[u32] {
        match self.mesh_groups.get(group) {
            Some(entry) => {
                let start = entry.mesh_indices_offset as usize;
                &self.mesh_indices.as_slice()[start..start + entry.mesh_count as usize]
            }
            None => &[],
        }
    }
}
