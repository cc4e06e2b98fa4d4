//! glTF 2.0 scene parser (`.gltf` and `.glb`)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use glam::Vec3;

use crate::core::error::{AssetLoadError, LoadManifestError};
use crate::math::transform::from_cols_4x4;

use super::description::{
    AlphaMode, AssetDescription, ImageBlob, MaterialDesc, MeshData, MeshGroupDesc, NodeDesc,
    PrimitiveDesc, TextureDesc,
};
use super::source::{SceneParser, SourceAsset};

/// Parses glTF files into [`GltfAsset`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct GltfParser;

impl GltfParser {
    pub fn new() -> Self {
        Self
    }

    /// True for file extensions this parser accepts.
    pub fn supports(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("gltf") || e.eq_ignore_ascii_case("glb"))
    }
}

impl SceneParser for GltfParser {
    fn parse(&self, path: &Path) -> Result<Arc<dyn SourceAsset>, LoadManifestError> {
        Ok(Arc::new(GltfAsset::open(path)?))
    }
}

/// A parsed glTF document with its binary buffers resident in memory.
///
/// Images are not decoded here; they are read on demand by texture jobs.
pub struct GltfAsset {
    path: PathBuf,
    document: gltf::Document,
    buffers: Vec<Vec<u8>>,
    description: AssetDescription,
}

impl GltfAsset {
    pub fn open(path: &Path) -> Result<Self, LoadManifestError> {
        if !path.is_file() {
            return Err(LoadManifestError::FileNotFound(path.to_path_buf()));
        }
        if !GltfParser::supports(path) {
            return Err(LoadManifestError::UnsupportedFileType(path.to_path_buf()));
        }

        let parse_failed = |reason: String| LoadManifestError::ParseFailed {
            path: path.to_path_buf(),
            reason,
        };

        let gltf::Gltf { document, blob } = gltf::Gltf::open(path).map_err(|e| parse_failed(e.to_string()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut buffers = Vec::new();
        for buffer in document.buffers() {
            let data = match buffer.source() {
                gltf::buffer::Source::Bin => blob
                    .clone()
                    .ok_or_else(|| parse_failed("missing binary chunk".into()))?,
                gltf::buffer::Source::Uri(uri) => {
                    read_uri(base_dir, uri).map_err(|e| parse_failed(format!("buffer {}: {}", buffer.index(), e)))?
                }
            };
            if data.len() < buffer.length() {
                return Err(parse_failed(format!(
                    "buffer {} holds {} bytes, {} declared",
                    buffer.index(),
                    data.len(),
                    buffer.length()
                )));
            }
            buffers.push(data);
        }

        let description = describe(&document);
        log::debug!(
            "Parsed {}: {} nodes, {} meshes, {} materials, {} textures",
            path.display(),
            description.nodes.len(),
            description.mesh_groups.len(),
            description.materials.len(),
            description.textures.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            document,
            buffers,
            description,
        })
    }

    fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

impl SourceAsset for GltfAsset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn description(&self) -> &AssetDescription {
        &self.description
    }

    fn read_mesh(&self, mesh_group: u32, primitive: u32) -> Result<MeshData, AssetLoadError> {
        let missing = AssetLoadError::MissingMesh { mesh: mesh_group, primitive };
        let mesh = self.document.meshes().nth(mesh_group as usize).ok_or(missing)?;
        let prim = mesh
            .primitives()
            .nth(primitive as usize)
            .ok_or(AssetLoadError::MissingMesh { mesh: mesh_group, primitive })?;

        if prim.mode() != gltf::mesh::Mode::Triangles {
            return Err(AssetLoadError::InvalidGeometry(format!(
                "primitive mode {:?} is not a triangle list",
                prim.mode()
            )));
        }

        let reader = prim.reader(|buffer| self.buffers.get(buffer.index()).map(|data| data.as_slice()));
        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .ok_or_else(|| AssetLoadError::InvalidGeometry("primitive has no POSITION attribute".into()))?
            .collect();
        let normals = reader.read_normals().map(|n| n.collect()).unwrap_or_default();
        let uvs = reader
            .read_tex_coords(0)
            .map(|t| t.into_f32().collect())
            .unwrap_or_default();
        let indices = reader.read_indices().map(|i| i.into_u32().collect());

        Ok(MeshData { positions, normals, uvs, indices })
    }

    fn read_image(&self, image: u32) -> Result<ImageBlob, AssetLoadError> {
        let img = self
            .document
            .images()
            .nth(image as usize)
            .ok_or(AssetLoadError::MissingImage(image))?;

        match img.source() {
            gltf::image::Source::View { view, mime_type } => {
                let buffer = self
                    .buffers
                    .get(view.buffer().index())
                    .ok_or(AssetLoadError::MissingImage(image))?;
                let bytes = buffer
                    .get(view.offset()..view.offset() + view.length())
                    .ok_or(AssetLoadError::MissingImage(image))?;
                Ok(ImageBlob {
                    bytes: bytes.to_vec(),
                    mime_type: Some(mime_type.to_string()),
                })
            }
            gltf::image::Source::Uri { uri, mime_type } => Ok(ImageBlob {
                bytes: read_uri(self.base_dir(), uri)?,
                mime_type: mime_type.map(str::to_string),
            }),
        }
    }
}

/// Resolve a glTF URI: base64 data URIs inline, anything else relative to the asset.
fn read_uri(base_dir: &Path, uri: &str) -> Result<Vec<u8>, AssetLoadError> {
    if let Some(rest) = uri.strip_prefix("data:") {
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| AssetLoadError::Decode("malformed data URI".into()))?;
        if !header.ends_with(";base64") {
            return Err(AssetLoadError::Decode("only base64 data URIs are supported".into()));
        }
        return base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| AssetLoadError::Decode(e.to_string()));
    }
    Ok(std::fs::read(base_dir.join(uri))?)
}

fn describe(document: &gltf::Document) -> AssetDescription {
    let nodes = document
        .nodes()
        .map(|node| NodeDesc {
            name: node.name().unwrap_or("").to_string(),
            transform: from_cols_4x4(&node.transform().matrix()),
            children: node.children().map(|c| c.index() as u32).collect(),
            mesh_group: node.mesh().map(|m| m.index() as u32),
            camera: node.camera().map(|c| c.index() as u32),
            light: node.light().map(|l| l.index() as u32),
        })
        .collect();

    let mesh_groups = document
        .meshes()
        .map(|mesh| MeshGroupDesc {
            name: mesh.name().unwrap_or("").to_string(),
            primitives: mesh
                .primitives()
                .map(|p| PrimitiveDesc {
                    material: p.material().index().map(|i| i as u32),
                })
                .collect(),
        })
        .collect();

    let materials = document
        .materials()
        .map(|material| {
            let pbr = material.pbr_metallic_roughness();
            let [r, g, b, _] = pbr.base_color_factor();
            MaterialDesc {
                name: material.name().unwrap_or("").to_string(),
                base_color: Vec3::new(r, g, b),
                alpha_mode: match material.alpha_mode() {
                    gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
                    gltf::material::AlphaMode::Mask => AlphaMode::Mask,
                    gltf::material::AlphaMode::Blend => AlphaMode::Blend,
                },
                diffuse_texture: pbr.base_color_texture().map(|t| t.texture().index() as u32),
                normal_texture: material.normal_texture().map(|t| t.texture().index() as u32),
                roughness_metalness_texture: pbr
                    .metallic_roughness_texture()
                    .map(|t| t.texture().index() as u32),
            }
        })
        .collect();

    let textures = document
        .textures()
        .map(|texture| TextureDesc {
            name: texture.name().unwrap_or("").to_string(),
            image: texture.source().index() as u32,
        })
        .collect();

    AssetDescription {
        nodes,
        mesh_groups,
        materials,
        textures,
        image_count: document.images().count() as u32,
    }
}
