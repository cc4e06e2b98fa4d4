//! GPU backend abstraction, command recording and shared GPU record layouts

pub mod backend;
pub mod command;
pub mod layout;
pub mod headless;

pub use backend::{
    BlasId, BlasTriangleGeometry, BufferDesc, BufferId, BuildSizes, DeviceAddress, GpuBackend,
    ImageDesc, ImageId, MemoryLocation, TextureFormat, TlasId,
};
pub use command::{Access, Command, CommandBatch};
pub use headless::{HeadlessBackend, HeadlessConfig, HeadlessStats};
pub use layout::{
    GpuBlasInstance, GpuMaterial, GpuMesh, GpuMeshGroup, INVALID_MANIFEST_INDEX,
};
