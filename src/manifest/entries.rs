//! Manifest row types

use std::path::PathBuf;
use std::sync::Arc;

use glam::Vec3;

use crate::asset::SourceAsset;
use crate::gpu::{BlasId, GpuMaterial, GpuMesh, ImageId};
use crate::scene::EntityId;

use super::table::ManifestTable;

/// Role a texture plays, derived from the materials that reference it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureKind {
    #[default]
    None,
    Diffuse,
    Normal,
    RoughnessMetalness,
    /// Diffuse whose alpha is used as an opacity mask
    DiffuseOpacity,
}

impl TextureKind {
    /// Whether a texture already classified as `self` may also be used as `other`.
    pub fn is_compatible_with(self, other: TextureKind) -> bool {
        use TextureKind::*;
        match (self, other) {
            (None, _) | (_, None) => true,
            (Diffuse | DiffuseOpacity, Diffuse | DiffuseOpacity) => true,
            (a, b) => a == b,
        }
    }

    pub fn is_color(self) -> bool {
        matches!(self, TextureKind::Diffuse | TextureKind::DiffuseOpacity)
    }
}

#[derive(Clone, Debug)]
pub struct TextureEntry {
    pub name: String,
    pub kind: TextureKind,
    pub asset: u32,
    pub asset_local_index: u32,
    pub asset_local_image: u32,
    /// Every material referencing this texture
    pub materials: Vec<u32>,
    pub runtime: Option<ImageId>,
    /// Opacity mask split out of the primary image
    pub secondary_runtime: Option<ImageId>,
}

#[derive(Clone, Debug)]
pub struct MaterialEntry {
    pub name: String,
    pub diffuse: Option<u32>,
    pub opacity_mask: Option<u32>,
    pub normal: Option<u32>,
    pub roughness_metalness: Option<u32>,
    pub asset: u32,
    pub asset_local_index: u32,
    pub alpha_discard_enabled: bool,
    pub normal_compressed_bc5_rg: bool,
    pub base_color: Vec3,
}

impl MaterialEntry {
    /// GPU record with texture handles resolved from their current runtime state.
    pub fn to_gpu(&self, textures: &ManifestTable<TextureEntry>) -> GpuMaterial {
        let primary = |index: Option<u32>| {
            index
                .and_then(|i| textures.get(i))
                .and_then(|t| t.runtime)
                .map_or(0, |id| id.0)
        };
        let secondary = |index: Option<u32>| {
            index
                .and_then(|i| textures.get(i))
                .and_then(|t| t.secondary_runtime)
                .map_or(0, |id| id.0)
        };
        GpuMaterial {
            diffuse_texture_id: primary(self.diffuse),
            opacity_texture_id: secondary(self.opacity_mask),
            normal_texture_id: primary(self.normal),
            roughness_metalness_id: primary(self.roughness_metalness),
            alpha_discard_enabled: self.alpha_discard_enabled as u32,
            normal_compressed_bc5_rg: self.normal_compressed_bc5_rg as u32,
            base_color: self.base_color.to_array(),
            _pad: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MeshEntry {
    pub asset: u32,
    pub asset_local_mesh_group: u32,
    pub asset_local_primitive: u32,
    /// Owning mesh group manifest index
    pub mesh_group: u32,
    pub material: Option<u32>,
    /// Set once when the payload has been uploaded, never changed afterwards
    pub runtime: Option<GpuMesh>,
}

#[derive(Clone, Debug)]
pub struct MeshGroupEntry {
    pub name: String,
    /// Offset of this group's run in the mesh index table
    pub mesh_indices_offset: u32,
    pub mesh_count: u32,
    pub asset: u32,
    pub asset_local_index: u32,
    pub blas: Option<BlasId>,
}

/// One ingested file.
pub struct AssetRecord {
    pub path: PathBuf,
    /// Kept alive for background jobs that re-read payloads
    pub source: Arc<dyn SourceAsset>,
    pub texture_offset: u32,
    pub material_offset: u32,
    pub mesh_group_offset: u32,
    pub mesh_offset: u32,
    pub root_entity: EntityId,
}

impl std::fmt::Debug for AssetRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRecord")
            .field("path", &self.path)
            .field("texture_offset", &self.texture_offset)
            .field("material_offset", &self.material_offset)
            .field("mesh_group_offset", &self.mesh_group_offset)
            .field("mesh_offset", &self.mesh_offset)
            .field("root_entity", &self.root_entity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_compatibility() {
        use TextureKind::*;
        assert!(None.is_compatible_with(Normal));
        assert!(Diffuse.is_compatible_with(Diffuse));
        assert!(Diffuse.is_compatible_with(DiffuseOpacity));
        assert!(DiffuseOpacity.is_compatible_with(Diffuse));
        assert!(!Normal.is_compatible_with(Diffuse));
        assert!(!RoughnessMetalness.is_compatible_with(Normal));
    }

    #[test]
    fn test_material_handles_resolve_late() {
        let mut textures = ManifestTable::new("texture", 4);
        textures
            .push(TextureEntry {
                name: "albedo".into(),
                kind: TextureKind::Diffuse,
                asset: 0,
                asset_local_index: 0,
                asset_local_image: 0,
                materials: vec![0],
                runtime: None,
                secondary_runtime: None,
            })
            .unwrap();
        let material = MaterialEntry {
            name: "mat".into(),
            diffuse: Some(0),
            opacity_mask: Some(0),
            normal: None,
            roughness_metalness: None,
            asset: 0,
            asset_local_index: 0,
            alpha_discard_enabled: true,
            normal_compressed_bc5_rg: false,
            base_color: Vec3::new(1.0, 0.5, 0.25),
        };

        let gpu = material.to_gpu(&textures);
        assert!(gpu.diffuse().is_null());
        assert_eq!(gpu.alpha_discard_enabled, 1);
        assert_eq!(gpu.base_color, [1.0, 0.5, 0.25]);

        textures[0].runtime = Some(ImageId(9));
        textures[0].secondary_runtime = Some(ImageId(10));
        let gpu = material.to_gpu(&textures);
        assert_eq!(gpu.diffuse(), ImageId(9));
        assert_eq!(gpu.opacity(), ImageId(10));
        assert!(gpu.normal().is_null());
    }
}
