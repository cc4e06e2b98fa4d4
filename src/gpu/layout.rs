//! GPU record layouts for the manifest tables and acceleration structure instances

use bytemuck::{Pod, Zeroable};

use crate::math::InstanceTransform;

use super::backend::{BufferId, DeviceAddress, ImageId};

/// Marks an absent manifest reference in GPU records.
pub const INVALID_MANIFEST_INDEX: u32 = !0;

/// One loaded mesh (48 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuMesh {
    /// Buffer holding all vertex and index data of this mesh (0 = not loaded)
    pub mesh_buffer: u32,
    /// Material manifest index, `INVALID_MANIFEST_INDEX` if none
    pub material_index: u32,
    pub vertex_count: u32,
    pub index_count: u32,
    /// RGB32F positions
    pub vertex_positions: DeviceAddress,
    /// RG32F texture coordinates
    pub vertex_uvs: DeviceAddress,
    /// RGB32F normals
    pub vertex_normals: DeviceAddress,
    /// u32 triangle list indices
    pub indices: DeviceAddress,
}

impl GpuMesh {
    /// Row written for a mesh whose payload has not arrived yet.
    pub fn unloaded(material_index: Option<u32>) -> Self {
        Self {
            material_index: material_index.unwrap_or(INVALID_MANIFEST_INDEX),
            ..Self::default()
        }
    }

    pub fn buffer(&self) -> BufferId {
        BufferId(self.mesh_buffer)
    }

    pub fn is_loaded(&self) -> bool {
        self.mesh_buffer != 0
    }
}

/// One mesh group (16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuMeshGroup {
    /// Address of this group's first entry in the mesh index array
    pub mesh_indices: DeviceAddress,
    pub count: u32,
    pub _pad: u32,
}

/// One material (40 bytes). Texture fields hold image ids, 0 = no texture bound yet.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub diffuse_texture_id: u32,
    pub opacity_texture_id: u32,
    pub normal_texture_id: u32,
    pub roughness_metalness_id: u32,
    pub alpha_discard_enabled: u32,
    pub normal_compressed_bc5_rg: u32,
    pub base_color: [f32; 3],
    pub _pad: u32,
}

impl GpuMaterial {
    pub fn diffuse(&self) -> ImageId {
        ImageId(self.diffuse_texture_id)
    }

    pub fn opacity(&self) -> ImageId {
        ImageId(self.opacity_texture_id)
    }

    pub fn normal(&self) -> ImageId {
        ImageId(self.normal_texture_id)
    }
}

/// Top-level instance record (64 bytes), matches VkAccelerationStructureInstanceKHR.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuBlasInstance {
    pub transform: InstanceTransform,
    /// custom index (low 24 bits) | mask (high 8 bits)
    pub instance_custom_index_and_mask: u32,
    /// shader binding table record offset (low 24 bits) | flags (high 8 bits)
    pub sbt_offset_and_flags: u32,
    pub blas_address: DeviceAddress,
}

impl GpuBlasInstance {
    pub fn new(transform: InstanceTransform, custom_index: u32, mask: u8, sbt_offset: u32, blas_address: DeviceAddress) -> Self {
        Self {
            transform,
            instance_custom_index_and_mask: (custom_index & 0x00FF_FFFF) | ((mask as u32) << 24),
            sbt_offset_and_flags: sbt_offset & 0x00FF_FFFF,
            blas_address,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.instance_custom_index_and_mask & 0x00FF_FFFF
    }

    pub fn mask(&self) -> u8 {
        (self.instance_custom_index_and_mask >> 24) as u8
    }

    pub fn sbt_offset(&self) -> u32 {
        self.sbt_offset_and_flags & 0x00FF_FFFF
    }
}
