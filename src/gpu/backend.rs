//! Device capability set consumed by the scene pipeline.
//!
//! The pipeline never talks to a graphics API directly. It creates and
//! destroys resources through [`GpuBackend`], records work into
//! [`CommandBatch`](super::CommandBatch)es and hands them back for submission.

use crate::core::error::GpuError;

use super::command::CommandBatch;

/// Device address of a buffer or acceleration structure.
pub type DeviceAddress = u64;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// The null handle. Backends never hand it out.
            pub const NULL: Self = Self(0);

            pub fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

resource_id!(
    /// Handle to a GPU buffer.
    BufferId
);
resource_id!(
    /// Handle to a GPU image. Stored directly in [`GpuMaterial`](super::GpuMaterial), 0 = no texture.
    ImageId
);
resource_id!(
    /// Handle to a bottom-level acceleration structure.
    BlasId
);
resource_id!(
    /// Handle to a top-level acceleration structure.
    TlasId
);

/// Where a buffer lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Only reachable through copies and device addresses
    DeviceLocal,
    /// Mapped, writable from the CPU with [`GpuBackend::write_buffer`]
    HostVisible,
}

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub name: String,
    pub size: u64,
    pub location: MemoryLocation,
}

impl BufferDesc {
    pub fn device(name: impl Into<String>, size: u64) -> Self {
        Self { name: name.into(), size, location: MemoryLocation::DeviceLocal }
    }

    pub fn staging(name: impl Into<String>, size: u64) -> Self {
        Self { name: name.into(), size, location: MemoryLocation::HostVisible }
    }
}

/// Texel formats produced by the texture transcoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8Srgb,
    Rgba8Unorm,
    Rg8Unorm,
    R8Unorm,
    Bc5RgUnorm,
    Bc7RgbaSrgb,
}

impl TextureFormat {
    /// Bytes needed for one mip level of the given extent.
    pub fn level_size(self, extent: [u32; 2]) -> u64 {
        let (w, h) = (extent[0].max(1) as u64, extent[1].max(1) as u64);
        match self {
            Self::Rgba8Srgb | Self::Rgba8Unorm => w * h * 4,
            Self::Rg8Unorm => w * h * 2,
            Self::R8Unorm => w * h,
            // 4x4 blocks of 16 bytes
            Self::Bc5RgUnorm | Self::Bc7RgbaSrgb => w.div_ceil(4) * h.div_ceil(4) * 16,
        }
    }

    pub fn is_block_compressed(self) -> bool {
        matches!(self, Self::Bc5RgUnorm | Self::Bc7RgbaSrgb)
    }
}

#[derive(Clone, Debug)]
pub struct ImageDesc {
    pub name: String,
    pub format: TextureFormat,
    pub extent: [u32; 2],
    pub mip_levels: u32,
}

/// Triangle geometry for one mesh inside a bottom-level build.
///
/// Vertices are tightly packed RGB32F positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlasTriangleGeometry {
    pub vertex_data: DeviceAddress,
    pub vertex_stride: u64,
    /// Highest vertex index referenced (vertex_count - 1)
    pub max_vertex: u32,
    pub index_data: DeviceAddress,
    pub triangle_count: u32,
    pub opaque: bool,
}

/// Backend estimate of acceleration structure memory needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSizes {
    pub acceleration_structure_size: u64,
    pub build_scratch_size: u64,
}

/// Resource allocation, queries and submission.
///
/// All `destroy_*` calls are deferred: the resource stays valid for work
/// already submitted and is released by the next [`collect_garbage`](Self::collect_garbage)
/// after the device has finished with it.
pub trait GpuBackend: Send + Sync {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId, GpuError>;
    fn destroy_buffer(&self, id: BufferId);

    /// Write into a host-visible buffer.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError>;

    fn buffer_device_address(&self, id: BufferId) -> Result<DeviceAddress, GpuError>;

    fn create_image(&self, desc: &ImageDesc) -> Result<ImageId, GpuError>;
    fn destroy_image(&self, id: ImageId);

    fn blas_build_sizes(&self, geometries: &[BlasTriangleGeometry]) -> BuildSizes;
    fn tlas_build_sizes(&self, instance_count: u32) -> BuildSizes;

    /// Required alignment of scratch addresses passed to builds.
    fn min_scratch_alignment(&self) -> u64;

    fn create_blas(&self, name: &str, size: u64) -> Result<BlasId, GpuError>;
    fn destroy_blas(&self, id: BlasId);
    fn blas_device_address(&self, id: BlasId) -> Result<DeviceAddress, GpuError>;

    fn create_tlas(&self, name: &str, size: u64) -> Result<TlasId, GpuError>;
    fn destroy_tlas(&self, id: TlasId);

    /// Execute batches in order.
    fn submit(&self, batches: Vec<CommandBatch>) -> Result<(), GpuError>;

    fn wait_idle(&self);

    /// Release retired resources.
    fn collect_garbage(&self);
}
