//! Parser and parsed-source interfaces

use std::path::Path;
use std::sync::Arc;

use crate::core::error::{AssetLoadError, LoadManifestError};

use super::description::{AssetDescription, ImageBlob, MeshData};

/// A parsed asset. Kept alive for the lifetime of the scene because
/// background jobs lazily re-read mesh and image payloads from it.
pub trait SourceAsset: Send + Sync {
    fn path(&self) -> &Path;

    fn description(&self) -> &AssetDescription;

    /// Geometry of `primitive` in asset-local mesh group `mesh_group`.
    fn read_mesh(&self, mesh_group: u32, primitive: u32) -> Result<MeshData, AssetLoadError>;

    /// Encoded bytes of asset-local image `image`.
    fn read_image(&self, image: u32) -> Result<ImageBlob, AssetLoadError>;
}

/// Turns a file into a [`SourceAsset`].
///
/// Returns only `FileNotFound`, `UnsupportedFileType` or `ParseFailed`.
pub trait SceneParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Arc<dyn SourceAsset>, LoadManifestError>;
}
