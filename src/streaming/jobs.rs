//! Mesh and texture load jobs.
//!
//! Each job reads one payload from its source asset, converts it to its GPU
//! layout, fills a staging buffer and publishes a pending upload. Jobs touch
//! no manifest state; everything they produce flows through the
//! [`UploadQueue`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::asset::{MeshData, SourceAsset, TextureTranscoder, TranscodeTarget};
use crate::core::error::AssetLoadError;
use crate::gpu::{BufferDesc, BufferId, GpuBackend, GpuMesh, ImageDesc, ImageId, INVALID_MANIFEST_INDEX};
use crate::manifest::TextureKind;
use crate::math::align_up;

use super::uploads::{ImageUpload, MipRegion, PendingMeshUpload, PendingTextureUpload, UploadQueue};

/// Alignment of every section inside a mesh buffer.
pub const MESH_SECTION_ALIGNMENT: u64 = 16;

/// Shared handles every job needs.
#[derive(Clone)]
pub struct JobContext {
    pub backend: Arc<dyn GpuBackend>,
    pub transcoder: Arc<dyn TextureTranscoder>,
    pub uploads: Arc<UploadQueue>,
    /// Cleared when the owning scene shuts down
    pub alive: Arc<AtomicBool>,
}

impl JobContext {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// How a job ended, other than by error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Published,
    /// The scene went away before or while the job ran
    Cancelled,
}

/// Destroys the resources a job created unless they were handed off.
struct CreatedResources<'a> {
    backend: &'a dyn GpuBackend,
    buffers: Vec<BufferId>,
    images: Vec<ImageId>,
}

impl<'a> CreatedResources<'a> {
    fn new(backend: &'a dyn GpuBackend) -> Self {
        Self { backend, buffers: Vec::new(), images: Vec::new() }
    }

    fn buffer(&mut self, desc: &BufferDesc) -> Result<BufferId, AssetLoadError> {
        let id = self.backend.create_buffer(desc)?;
        self.buffers.push(id);
        Ok(id)
    }

    fn image(&mut self, desc: &ImageDesc) -> Result<ImageId, AssetLoadError> {
        let id = self.backend.create_image(desc)?;
        self.images.push(id);
        Ok(id)
    }

    /// Ownership moved elsewhere; nothing to clean up.
    fn hand_off(mut self) {
        self.buffers.clear();
        self.images.clear();
    }
}

impl Drop for CreatedResources<'_> {
    fn drop(&mut self) {
        for &buffer in &self.buffers {
            self.backend.destroy_buffer(buffer);
        }
        for &image in &self.images {
            self.backend.destroy_image(image);
        }
    }
}

/// Byte offsets of the sections of one mesh buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshLayout {
    pub vertex_count: u32,
    pub index_count: u32,
    pub positions: u64,
    pub uvs: u64,
    pub normals: u64,
    pub indices: u64,
    pub size: u64,
}

impl MeshLayout {
    pub fn new(vertex_count: u32, index_count: u32) -> Self {
        let v = vertex_count as u64;
        let positions = 0;
        let uvs = align_up(positions + v * 12, MESH_SECTION_ALIGNMENT);
        let normals = align_up(uvs + v * 8, MESH_SECTION_ALIGNMENT);
        let indices = align_up(normals + v * 12, MESH_SECTION_ALIGNMENT);
        let size = align_up(indices + index_count as u64 * 4, MESH_SECTION_ALIGNMENT);
        Self { vertex_count, index_count, positions, uvs, normals, indices, size }
    }
}

/// Check `data` and pack it into the mesh buffer layout.
///
/// Missing uvs and normals are zero-filled, missing indices become `0..n`.
pub fn pack_mesh(data: &MeshData) -> Result<(MeshLayout, Vec<u8>), AssetLoadError> {
    let vertex_count = data.positions.len();
    if vertex_count == 0 {
        return Err(AssetLoadError::InvalidGeometry("primitive has no vertices".into()));
    }
    if !data.uvs.is_empty() && data.uvs.len() != vertex_count {
        return Err(AssetLoadError::InvalidGeometry(format!(
            "{} uvs for {} vertices",
            data.uvs.len(),
            vertex_count
        )));
    }
    if !data.normals.is_empty() && data.normals.len() != vertex_count {
        return Err(AssetLoadError::InvalidGeometry(format!(
            "{} normals for {} vertices",
            data.normals.len(),
            vertex_count
        )));
    }

    let generated;
    let indices: &[u32] = match &data.indices {
        Some(indices) => indices,
        None => {
            generated = (0..vertex_count as u32).collect::<Vec<_>>();
            &generated
        }
    };
    if indices.is_empty() || indices.len() % 3 != 0 {
        return Err(AssetLoadError::InvalidGeometry(format!(
            "index count {} is not a positive multiple of 3",
            indices.len()
        )));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(AssetLoadError::InvalidGeometry(format!(
            "index {} out of range for {} vertices",
            bad, vertex_count
        )));
    }

    let layout = MeshLayout::new(vertex_count as u32, indices.len() as u32);
    let mut bytes = vec![0u8; layout.size as usize];
    let mut put = |offset: u64, src: &[u8]| {
        bytes[offset as usize..offset as usize + src.len()].copy_from_slice(src);
    };
    put(layout.positions, bytemuck::cast_slice(&data.positions));
    put(layout.uvs, bytemuck::cast_slice(&data.uvs));
    put(layout.normals, bytemuck::cast_slice(&data.normals));
    put(layout.indices, bytemuck::cast_slice(indices));

    Ok((layout, bytes))
}

/// Load of one mesh (one primitive of a source mesh group).
pub struct MeshLoadJob {
    pub source: Arc<dyn SourceAsset>,
    /// Global mesh manifest index
    pub mesh: u32,
    pub asset_local_mesh_group: u32,
    pub asset_local_primitive: u32,
    /// Global material manifest index
    pub material: Option<u32>,
}

impl MeshLoadJob {
    pub fn run(&self, ctx: &JobContext) -> Result<JobOutcome, AssetLoadError> {
        if !ctx.is_alive() {
            return Ok(JobOutcome::Cancelled);
        }

        let data = self.source.read_mesh(self.asset_local_mesh_group, self.asset_local_primitive)?;
        let (layout, bytes) = pack_mesh(&data)?;

        let backend = ctx.backend.as_ref();
        let mut created = CreatedResources::new(backend);
        let buffer = created.buffer(&BufferDesc::device(format!("mesh {}", self.mesh), layout.size))?;
        let staging = created.buffer(&BufferDesc::staging(format!("mesh {} staging", self.mesh), layout.size))?;
        backend.write_buffer(staging, 0, &bytes)?;
        let address = backend.buffer_device_address(buffer)?;

        let runtime = GpuMesh {
            mesh_buffer: buffer.0,
            material_index: self.material.unwrap_or(INVALID_MANIFEST_INDEX),
            vertex_count: layout.vertex_count,
            index_count: layout.index_count,
            vertex_positions: address + layout.positions,
            vertex_uvs: address + layout.uvs,
            vertex_normals: address + layout.normals,
            indices: address + layout.indices,
        };

        if !ctx.is_alive() {
            return Ok(JobOutcome::Cancelled);
        }
        let upload = PendingMeshUpload { mesh: self.mesh, staging, size: layout.size, runtime };
        match ctx.uploads.push_mesh(upload) {
            Ok(()) => {
                created.hand_off();
                Ok(JobOutcome::Published)
            }
            Err(_) => Ok(JobOutcome::Cancelled),
        }
    }
}

/// Load of one texture image.
pub struct TextureLoadJob {
    pub source: Arc<dyn SourceAsset>,
    /// Global texture manifest index
    pub texture: u32,
    pub name: String,
    pub asset_local_image: u32,
    pub kind: TextureKind,
}

impl TextureLoadJob {
    fn target(&self) -> TranscodeTarget {
        match self.kind {
            TextureKind::DiffuseOpacity => TranscodeTarget::ColorWithOpacity,
            TextureKind::Normal => TranscodeTarget::Normal,
            TextureKind::RoughnessMetalness => TranscodeTarget::Linear,
            TextureKind::Diffuse | TextureKind::None => TranscodeTarget::Color,
        }
    }

    pub fn run(&self, ctx: &JobContext) -> Result<JobOutcome, AssetLoadError> {
        if !ctx.is_alive() {
            return Ok(JobOutcome::Cancelled);
        }

        let blob = self.source.read_image(self.asset_local_image)?;
        let decoded = ctx.transcoder.decode(&blob.bytes, self.target())?;

        let backend = ctx.backend.as_ref();
        let mut created = CreatedResources::new(backend);
        let total = decoded.primary.byte_size() + decoded.opacity.as_ref().map_or(0, |o| o.byte_size());
        let staging = created.buffer(&BufferDesc::staging(format!("texture {} staging", self.texture), total))?;

        let mut offset = 0u64;
        let mut stage = |suffix: &str, chain: &crate::asset::MipChain| -> Result<ImageUpload, AssetLoadError> {
            let image = created.image(&ImageDesc {
                name: format!("{}{}", self.name, suffix),
                format: chain.format,
                extent: chain.extent(),
                mip_levels: chain.levels.len() as u32,
            })?;
            let mut regions = Vec::with_capacity(chain.levels.len());
            for (mip, level) in chain.levels.iter().enumerate() {
                backend.write_buffer(staging, offset, &level.data)?;
                regions.push(MipRegion { staging_offset: offset, mip_level: mip as u32, extent: level.extent });
                offset += level.data.len() as u64;
            }
            Ok(ImageUpload { image, format: chain.format, regions })
        };

        let primary = stage("", &decoded.primary)?;
        let secondary = match &decoded.opacity {
            Some(opacity) => Some(stage(" opacity", opacity)?),
            None => None,
        };

        if !ctx.is_alive() {
            return Ok(JobOutcome::Cancelled);
        }
        let upload = PendingTextureUpload { texture: self.texture, staging, primary, secondary };
        match ctx.uploads.push_texture(upload) {
            Ok(()) => {
                created.hand_off();
                Ok(JobOutcome::Published)
            }
            Err(_) => Ok(JobOutcome::Cancelled),
        }
    }
}
