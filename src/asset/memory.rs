//! Assets assembled in memory.
//!
//! Used for procedurally generated content and as fixtures: a
//! [`MemoryParser`] maps registered paths to prebuilt assets and behaves like
//! a file parser for everything else.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::Affine3A;
use parking_lot::Mutex;

use crate::core::error::{AssetLoadError, LoadManifestError};

use super::description::{
    AssetDescription, ImageBlob, MaterialDesc, MeshData, MeshGroupDesc, NodeDesc, PrimitiveDesc,
    TextureDesc,
};
use super::source::{SceneParser, SourceAsset};

/// A fully resident asset.
pub struct MemoryAsset {
    path: PathBuf,
    description: AssetDescription,
    meshes: HashMap<(u32, u32), MeshData>,
    images: Vec<ImageBlob>,
}

impl MemoryAsset {
    pub fn builder() -> MemoryAssetBuilder {
        MemoryAssetBuilder::default()
    }
}

impl SourceAsset for MemoryAsset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn description(&self) -> &AssetDescription {
        &self.description
    }

    fn read_mesh(&self, mesh_group: u32, primitive: u32) -> Result<MeshData, AssetLoadError> {
        self.meshes
            .get(&(mesh_group, primitive))
            .cloned()
            .ok_or(AssetLoadError::MissingMesh { mesh: mesh_group, primitive })
    }

    fn read_image(&self, image: u32) -> Result<ImageBlob, AssetLoadError> {
        self.images
            .get(image as usize)
            .cloned()
            .ok_or(AssetLoadError::MissingImage(image))
    }
}

/// Incremental construction of a [`MemoryAsset`]. Every adder returns the
/// asset-local index of what it added.
#[derive(Default)]
pub struct MemoryAssetBuilder {
    description: AssetDescription,
    meshes: HashMap<(u32, u32), MeshData>,
    images: Vec<ImageBlob>,
}

impl MemoryAssetBuilder {
    pub fn node(&mut self, name: &str, transform: Affine3A, mesh_group: Option<u32>) -> u32 {
        let mut node = NodeDesc::new(name);
        node.transform = transform;
        node.mesh_group = mesh_group;
        self.push_node(node)
    }

    pub fn push_node(&mut self, node: NodeDesc) -> u32 {
        self.description.nodes.push(node);
        self.description.nodes.len() as u32 - 1
    }

    /// Append `child` to `parent`'s child list.
    pub fn child(&mut self, parent: u32, child: u32) -> &mut Self {
        self.description.nodes[parent as usize].children.push(child);
        self
    }

    /// A mesh group whose primitives carry the given geometry and material.
    pub fn mesh_group(&mut self, name: &str, primitives: Vec<(MeshData, Option<u32>)>) -> u32 {
        let group = self.description.mesh_groups.len() as u32;
        let mut desc = MeshGroupDesc { name: name.to_string(), primitives: Vec::new() };
        for (i, (data, material)) in primitives.into_iter().enumerate() {
            desc.primitives.push(PrimitiveDesc { material });
            self.meshes.insert((group, i as u32), data);
        }
        self.description.mesh_groups.push(desc);
        group
    }

    pub fn material(&mut self, material: MaterialDesc) -> u32 {
        self.description.materials.push(material);
        self.description.materials.len() as u32 - 1
    }

    /// A texture backed by its own image.
    pub fn texture(&mut self, name: &str, image: ImageBlob) -> u32 {
        self.images.push(image);
        let image = self.images.len() as u32 - 1;
        self.texture_for_image(name, image)
    }

    /// A texture referencing an image index, which need not exist.
    pub fn texture_for_image(&mut self, name: &str, image: u32) -> u32 {
        self.description.textures.push(TextureDesc { name: name.to_string(), image });
        self.description.textures.len() as u32 - 1
    }

    pub fn build(mut self, path: impl Into<PathBuf>) -> MemoryAsset {
        self.description.image_count = self.description.image_count.max(self.images.len() as u32);
        MemoryAsset {
            path: path.into(),
            description: self.description,
            meshes: self.meshes,
            images: self.images,
        }
    }

    /// Declare more images than are backed by data, so reads of the extra ones fail.
    pub fn declare_images(&mut self, count: u32) -> &mut Self {
        self.description.image_count = count;
        self
    }
}

/// Parser over registered in-memory assets.
#[derive(Default)]
pub struct MemoryParser {
    assets: Mutex<HashMap<PathBuf, Arc<MemoryAsset>>>,
}

impl MemoryParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, asset: MemoryAsset) {
        let path = asset.path.clone();
        self.assets.lock().insert(path, Arc::new(asset));
    }
}

impl SceneParser for MemoryParser {
    fn parse(&self, path: &Path) -> Result<Arc<dyn SourceAsset>, LoadManifestError> {
        match self.assets.lock().get(path) {
            Some(asset) => Ok(asset.clone() as Arc<dyn SourceAsset>),
            None => Err(LoadManifestError::FileNotFound(path.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_indices() {
        let mut builder = MemoryAsset::builder();
        let tex = builder.texture("albedo", ImageBlob::default());
        let mat = builder.material(MaterialDesc {
            diffuse_texture: Some(tex),
            ..Default::default()
        });
        let group = builder.mesh_group("quad", vec![(MeshData::quad(), Some(mat)), (MeshData::triangle(), None)]);
        let root = builder.node("root", Affine3A::IDENTITY, None);
        let leaf = builder.node("leaf", Affine3A::IDENTITY, Some(group));
        builder.child(root, leaf);
        let asset = builder.build("scene.mem");

        let desc = asset.description();
        assert_eq!(desc.nodes[0].children, vec![1]);
        assert_eq!(desc.mesh_count(), 2);
        assert_eq!(desc.image_count, 1);
        assert_eq!(asset.read_mesh(0, 1).unwrap(), MeshData::triangle());
        assert!(asset.read_mesh(1, 0).is_err());
        assert!(asset.read_image(0).is_ok());
        assert!(matches!(asset.read_image(1), Err(AssetLoadError::MissingImage(1))));
    }

    #[test]
    fn test_parser_lookup() {
        let parser = MemoryParser::new();
        parser.register(MemoryAsset::builder().build("a.mem"));

        assert!(parser.parse(Path::new("a.mem")).is_ok());
        let err = parser.parse(Path::new("b.mem")).err().unwrap();
        assert!(matches!(err, LoadManifestError::FileNotFound(_)));
    }
}
