//! Format-neutral description of a parsed scene asset.
//!
//! Indices in here are asset-local: node children index `nodes`, mesh
//! references index `mesh_groups`, and so on. Ingest translates them to
//! global manifest indices using the offsets it records per asset.

use glam::{Affine3A, Vec3};

/// A node of the source hierarchy.
#[derive(Clone, Debug)]
pub struct NodeDesc {
    pub name: String,
    /// Transform relative to the parent node
    pub transform: Affine3A,
    /// Asset-local node indices
    pub children: Vec<u32>,
    pub mesh_group: Option<u32>,
    pub camera: Option<u32>,
    pub light: Option<u32>,
}

impl NodeDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Affine3A::IDENTITY,
            children: Vec::new(),
            mesh_group: None,
            camera: None,
            light: None,
        }
    }
}

/// One drawable primitive inside a mesh group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrimitiveDesc {
    /// Asset-local material index
    pub material: Option<u32>,
}

/// A multi-primitive mesh.
#[derive(Clone, Debug, Default)]
pub struct MeshGroupDesc {
    pub name: String,
    pub primitives: Vec<PrimitiveDesc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

#[derive(Clone, Debug)]
pub struct MaterialDesc {
    pub name: String,
    /// Linear RGB tint
    pub base_color: Vec3,
    pub alpha_mode: AlphaMode,
    /// Asset-local texture indices
    pub diffuse_texture: Option<u32>,
    pub normal_texture: Option<u32>,
    pub roughness_metalness_texture: Option<u32>,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color: Vec3::ONE,
            alpha_mode: AlphaMode::Opaque,
            diffuse_texture: None,
            normal_texture: None,
            roughness_metalness_texture: None,
        }
    }
}

/// A texture referencing one source image.
#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub name: String,
    /// Asset-local image index
    pub image: u32,
}

/// Everything ingest needs to know about an asset, without payloads.
#[derive(Clone, Debug, Default)]
pub struct AssetDescription {
    pub nodes: Vec<NodeDesc>,
    pub mesh_groups: Vec<MeshGroupDesc>,
    pub materials: Vec<MaterialDesc>,
    pub textures: Vec<TextureDesc>,
    pub image_count: u32,
}

impl AssetDescription {
    pub fn mesh_count(&self) -> usize {
        self.mesh_groups.iter().map(|g| g.primitives.len()).sum()
    }
}

/// Geometry of one primitive as read from the source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    /// Empty when the source has none
    pub normals: Vec<[f32; 3]>,
    /// Empty when the source has none
    pub uvs: Vec<[f32; 2]>,
    /// `None` for non-indexed geometry
    pub indices: Option<Vec<u32>>,
}

impl MeshData {
    /// A unit quad in the XY plane made of two triangles.
    pub fn quad() -> Self {
        Self {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            indices: Some(vec![0, 1, 2, 0, 2, 3]),
        }
    }

    /// A single triangle without normals, uvs or indices.
    pub fn triangle() -> Self {
        Self {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            ..Self::default()
        }
    }
}

/// Encoded image bytes as stored in the source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}
