//! In-process GPU backend.
//!
//! Buffers are plain byte vectors, device addresses are bump allocated and
//! submitted batches are executed on the CPU. Copies really move bytes and
//! top-level builds decode their instance arrays, so the state the renderer
//! would see can be inspected directly. Used by the driver binary when no
//! device is attached, by tests, and by benchmarks.

use std::collections::HashMap;

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::core::error::GpuError;
use crate::math::align_up;

use super::backend::{
    BlasId, BlasTriangleGeometry, BufferDesc, BufferId, BuildSizes, DeviceAddress, GpuBackend,
    ImageDesc, ImageId, MemoryLocation, TlasId,
};
use super::command::{Command, CommandBatch};
use super::layout::GpuBlasInstance;

/// First device address handed out; keeps 0 free as a null address.
const ADDRESS_BASE: DeviceAddress = 0x1000_0000;
/// Alignment of every resource's device address.
const ADDRESS_ALIGNMENT: u64 = 256;

/// Build size model and limits of the headless device.
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub min_scratch_alignment: u64,
    /// Fixed part of every acceleration structure size and scratch estimate
    pub build_overhead: u64,
    pub blas_bytes_per_triangle: u64,
    pub blas_scratch_bytes_per_triangle: u64,
    pub tlas_bytes_per_instance: u64,
    pub tlas_scratch_bytes_per_instance: u64,
    /// Total bytes of live plus retired resources allowed, `None` for unlimited
    pub memory_limit: Option<u64>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            min_scratch_alignment: 128,
            build_overhead: 256,
            blas_bytes_per_triangle: 64,
            blas_scratch_bytes_per_triangle: 32,
            tlas_bytes_per_instance: 128,
            tlas_scratch_bytes_per_instance: 64,
            memory_limit: None,
        }
    }
}

/// Counters of executed work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub submissions: usize,
    pub buffer_copies: usize,
    pub image_copies: usize,
    pub barriers: usize,
    pub blas_builds: usize,
    pub tlas_builds: usize,
    pub collected: usize,
}

struct BufferState {
    name: String,
    location: MemoryLocation,
    address: DeviceAddress,
    data: Vec<u8>,
}

struct ImageState {
    desc: ImageDesc,
    written_mips: Vec<bool>,
}

struct BlasState {
    size: u64,
    address: DeviceAddress,
    triangles: Option<u32>,
}

struct TlasState {
    size: u64,
    instances: Option<Vec<GpuBlasInstance>>,
}

/// A resource table split into live and retired (destroyed, not yet collected) entries.
struct Pool<T> {
    live: HashMap<u32, T>,
    retired: HashMap<u32, T>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self { live: HashMap::new(), retired: HashMap::new() }
    }
}

impl<T> Pool<T> {
    fn get(&self, id: u32) -> Option<&T> {
        self.live.get(&id).or_else(|| self.retired.get(&id))
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        match self.live.get_mut(&id) {
            Some(state) => Some(state),
            None => self.retired.get_mut(&id),
        }
    }

    fn retire(&mut self, id: u32) -> bool {
        match self.live.remove(&id) {
            Some(state) => {
                self.retired.insert(id, state);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    next_address: DeviceAddress,
    allocated: u64,
    buffers: Pool<BufferState>,
    images: Pool<ImageState>,
    blases: Pool<BlasState>,
    tlases: Pool<TlasState>,
    stats: HeadlessStats,
}

impl Inner {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn alloc_address(&mut self, size: u64) -> DeviceAddress {
        if self.next_address == 0 {
            self.next_address = ADDRESS_BASE;
        }
        let address = self.next_address;
        self.next_address = align_up(address + size.max(1), ADDRESS_ALIGNMENT);
        address
    }

    fn reserve(&mut self, limit: Option<u64>, name: &str, size: u64) -> Result<(), GpuError> {
        if let Some(limit) = limit {
            if self.allocated.saturating_add(size) > limit {
                return Err(GpuError::OutOfMemory { name: name.to_string(), size });
            }
        }
        self.allocated += size;
        Ok(())
    }

    /// Find the buffer containing `[address, address + len)`.
    fn resolve(&self, address: DeviceAddress, len: u64) -> Result<(u32, u64), GpuError> {
        let buffers = self.buffers.live.iter().chain(self.buffers.retired.iter());
        for (&id, buffer) in buffers {
            let size = buffer.data.len() as u64;
            if address >= buffer.address && address < buffer.address + size.max(1) {
                let offset = address - buffer.address;
                if offset + len > size {
                    return Err(GpuError::OutOfBounds { id, offset, len, size });
                }
                return Ok((id, offset));
            }
        }
        Err(GpuError::InvalidAddress(address))
    }

    fn read_range(&self, id: BufferId, offset: u64, len: u64) -> Result<&[u8], GpuError> {
        let buffer = self
            .buffers
            .get(id.0)
            .ok_or(GpuError::InvalidHandle { kind: "buffer", id: id.0 })?;
        let size = buffer.data.len() as u64;
        if offset + len > size {
            return Err(GpuError::OutOfBounds { id: id.0, offset, len, size });
        }
        Ok(&buffer.data[offset as usize..(offset + len) as usize])
    }

    fn execute(&mut self, command: Command) -> Result<(), GpuError> {
        match command {
            Command::CopyBuffer { src, src_offset, dst, dst_offset, size } => {
                let bytes = self.read_range(src, src_offset, size)?.to_vec();
                let buffer = self
                    .buffers
                    .get_mut(dst.0)
                    .ok_or(GpuError::InvalidHandle { kind: "buffer", id: dst.0 })?;
                let dst_size = buffer.data.len() as u64;
                if dst_offset + size > dst_size {
                    return Err(GpuError::OutOfBounds { id: dst.0, offset: dst_offset, len: size, size: dst_size });
                }
                buffer.data[dst_offset as usize..(dst_offset + size) as usize].copy_from_slice(&bytes);
                self.stats.buffer_copies += 1;
            }
            Command::CopyBufferToImage { src, src_offset, dst, mip_level, extent } => {
                let image = self
                    .images
                    .get(dst.0)
                    .ok_or(GpuError::InvalidHandle { kind: "image", id: dst.0 })?;
                let len = image.desc.format.level_size(extent);
                if mip_level >= image.desc.mip_levels {
                    return Err(GpuError::InvalidHandle { kind: "image mip", id: mip_level });
                }
                self.read_range(src, src_offset, len)?;
                if let Some(image) = self.images.get_mut(dst.0) {
                    image.written_mips[mip_level as usize] = true;
                }
                self.stats.image_copies += 1;
            }
            Command::Barrier { .. } => {
                self.stats.barriers += 1;
            }
            Command::BuildBlas { blas, geometries, scratch } => {
                self.resolve(scratch, 1)?;
                let mut triangles = 0u32;
                for geometry in &geometries {
                    let vertex_bytes = (geometry.max_vertex as u64 + 1) * geometry.vertex_stride;
                    self.resolve(geometry.vertex_data, vertex_bytes)?;
                    self.resolve(geometry.index_data, geometry.triangle_count as u64 * 12)?;
                    triangles += geometry.triangle_count;
                }
                let state = self
                    .blases
                    .get_mut(blas.0)
                    .ok_or(GpuError::InvalidHandle { kind: "blas", id: blas.0 })?;
                state.triangles = Some(triangles);
                self.stats.blas_builds += 1;
            }
            Command::BuildTlas { tlas, instances, instance_count, scratch } => {
                self.resolve(scratch, 1)?;
                let decoded: Vec<GpuBlasInstance> = if instance_count == 0 {
                    Vec::new()
                } else {
                    let len = instance_count as u64 * std::mem::size_of::<GpuBlasInstance>() as u64;
                    let (id, offset) = self.resolve(instances, len)?;
                    bytemuck::pod_collect_to_vec(self.read_range(BufferId(id), offset, len)?)
                };
                for instance in &decoded {
                    let built = self.blases.live.values().any(|b| {
                        b.address == instance.blas_address && b.triangles.is_some()
                    });
                    if !built {
                        return Err(GpuError::InvalidAddress(instance.blas_address));
                    }
                }
                let state = self
                    .tlases
                    .get_mut(tlas.0)
                    .ok_or(GpuError::InvalidHandle { kind: "tlas", id: tlas.0 })?;
                state.instances = Some(decoded);
                self.stats.tlas_builds += 1;
            }
            Command::DestroyBufferDeferred(buffer) => {
                self.buffers.retire(buffer.0);
            }
        }
        Ok(())
    }
}

/// CPU-side implementation of [`GpuBackend`].
pub struct HeadlessBackend {
    config: HeadlessConfig,
    inner: Mutex<Inner>,
}

impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        Self { config, inner: Mutex::new(Inner::default()) }
    }

    pub fn config(&self) -> &HeadlessConfig {
        &self.config
    }

    // --- Inspection ---

    pub fn stats(&self) -> HeadlessStats {
        self.inner.lock().stats
    }

    /// Bytes held by live and retired resources.
    pub fn allocated_bytes(&self) -> u64 {
        self.inner.lock().allocated
    }

    pub fn live_buffer_count(&self) -> usize {
        self.inner.lock().buffers.live.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.inner.lock().images.live.len()
    }

    pub fn live_blas_count(&self) -> usize {
        self.inner.lock().blases.live.len()
    }

    pub fn live_tlas_count(&self) -> usize {
        self.inner.lock().tlases.live.len()
    }

    pub fn buffer_name(&self, id: BufferId) -> Option<String> {
        self.inner.lock().buffers.get(id.0).map(|b| b.name.clone())
    }

    /// Copy of a buffer's current contents.
    pub fn read_buffer(&self, id: BufferId) -> Option<Vec<u8>> {
        self.inner.lock().buffers.get(id.0).map(|b| b.data.clone())
    }

    /// Read `count` records of type `T` starting at record `first`.
    pub fn read_records<T: Pod>(&self, id: BufferId, first: usize, count: usize) -> Option<Vec<T>> {
        let stride = std::mem::size_of::<T>();
        let inner = self.inner.lock();
        let buffer = inner.buffers.get(id.0)?;
        let bytes = buffer.data.get(first * stride..(first + count) * stride)?;
        Some(bytemuck::pod_collect_to_vec(bytes))
    }

    pub fn is_blas_built(&self, id: BlasId) -> bool {
        self.inner
            .lock()
            .blases
            .get(id.0)
            .is_some_and(|b| b.triangles.is_some())
    }

    pub fn blas_triangle_count(&self, id: BlasId) -> Option<u32> {
        self.inner.lock().blases.get(id.0).and_then(|b| b.triangles)
    }

    pub fn blas_size(&self, id: BlasId) -> Option<u64> {
        self.inner.lock().blases.get(id.0).map(|b| b.size)
    }

    pub fn tlas_size(&self, id: TlasId) -> Option<u64> {
        self.inner.lock().tlases.get(id.0).map(|t| t.size)
    }

    /// Instances decoded from the last build of `id`, `None` if never built.
    pub fn tlas_instances(&self, id: TlasId) -> Option<Vec<GpuBlasInstance>> {
        self.inner.lock().tlases.get(id.0).and_then(|t| t.instances.clone())
    }

    /// True once every mip level of the image has received a copy.
    pub fn is_image_uploaded(&self, id: ImageId) -> bool {
        self.inner
            .lock()
            .images
            .get(id.0)
            .is_some_and(|i| i.written_mips.iter().all(|w| *w))
    }

    pub fn image_desc(&self, id: ImageId) -> Option<ImageDesc> {
        self.inner.lock().images.get(id.0).map(|i| i.desc.clone())
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId, GpuError> {
        let mut inner = self.inner.lock();
        inner.reserve(self.config.memory_limit, &desc.name, desc.size)?;
        let id = inner.alloc_id();
        let address = inner.alloc_address(desc.size);
        inner.buffers.live.insert(id, BufferState {
            name: desc.name.clone(),
            location: desc.location,
            address,
            data: vec![0u8; desc.size as usize],
        });
        Ok(BufferId(id))
    }

    fn destroy_buffer(&self, id: BufferId) {
        if !self.inner.lock().buffers.retire(id.0) {
            log::warn!("destroy of unknown buffer {}", id.0);
        }
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        let mut inner = self.inner.lock();
        let buffer = inner
            .buffers
            .live
            .get_mut(&id.0)
            .ok_or(GpuError::InvalidHandle { kind: "buffer", id: id.0 })?;
        if buffer.location != MemoryLocation::HostVisible {
            return Err(GpuError::NotHostVisible(id.0));
        }
        let len = data.len() as u64;
        let size = buffer.data.len() as u64;
        if offset + len > size {
            return Err(GpuError::OutOfBounds { id: id.0, offset, len, size });
        }
        buffer.data[offset as usize..(offset + len) as usize].copy_from_slice(data);
        Ok(())
    }

    fn buffer_device_address(&self, id: BufferId) -> Result<DeviceAddress, GpuError> {
        self.inner
            .lock()
            .buffers
            .get(id.0)
            .map(|b| b.address)
            .ok_or(GpuError::InvalidHandle { kind: "buffer", id: id.0 })
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<ImageId, GpuError> {
        let size: u64 = (0..desc.mip_levels)
            .map(|mip| {
                let extent = [(desc.extent[0] >> mip).max(1), (desc.extent[1] >> mip).max(1)];
                desc.format.level_size(extent)
            })
            .sum();
        let mut inner = self.inner.lock();
        inner.reserve(self.config.memory_limit, &desc.name, size)?;
        let id = inner.alloc_id();
        inner.images.live.insert(id, ImageState {
            desc: desc.clone(),
            written_mips: vec![false; desc.mip_levels as usize],
        });
        Ok(ImageId(id))
    }

    fn destroy_image(&self, id: ImageId) {
        if !self.inner.lock().images.retire(id.0) {
            log::warn!("destroy of unknown image {}", id.0);
        }
    }

    fn blas_build_sizes(&self, geometries: &[BlasTriangleGeometry]) -> BuildSizes {
        let triangles: u64 = geometries.iter().map(|g| g.triangle_count as u64).sum();
        BuildSizes {
            acceleration_structure_size: self.config.build_overhead + triangles * self.config.blas_bytes_per_triangle,
            build_scratch_size: self.config.build_overhead + triangles * self.config.blas_scratch_bytes_per_triangle,
        }
    }

    fn tlas_build_sizes(&self, instance_count: u32) -> BuildSizes {
        let instances = instance_count as u64;
        BuildSizes {
            acceleration_structure_size: self.config.build_overhead + instances * self.config.tlas_bytes_per_instance,
            build_scratch_size: self.config.build_overhead + instances * self.config.tlas_scratch_bytes_per_instance,
        }
    }

    fn min_scratch_alignment(&self) -> u64 {
        self.config.min_scratch_alignment
    }

    fn create_blas(&self, name: &str, size: u64) -> Result<BlasId, GpuError> {
        let mut inner = self.inner.lock();
        inner.reserve(self.config.memory_limit, name, size)?;
        let id = inner.alloc_id();
        let address = inner.alloc_address(size);
        inner.blases.live.insert(id, BlasState { size, address, triangles: None });
        Ok(BlasId(id))
    }

    fn destroy_blas(&self, id: BlasId) {
        if !self.inner.lock().blases.retire(id.0) {
            log::warn!("destroy of unknown blas {}", id.0);
        }
    }

    fn blas_device_address(&self, id: BlasId) -> Result<DeviceAddress, GpuError> {
        self.inner
            .lock()
            .blases
            .get(id.0)
            .map(|b| b.address)
            .ok_or(GpuError::InvalidHandle { kind: "blas", id: id.0 })
    }

    fn create_tlas(&self, name: &str, size: u64) -> Result<TlasId, GpuError> {
        let mut inner = self.inner.lock();
        inner.reserve(self.config.memory_limit, name, size)?;
        let id = inner.alloc_id();
        inner.alloc_address(size);
        inner.tlases.live.insert(id, TlasState { size, instances: None });
        Ok(TlasId(id))
    }

    fn destroy_tlas(&self, id: TlasId) {
        if !self.inner.lock().tlases.retire(id.0) {
            log::warn!("destroy of unknown tlas {}", id.0);
        }
    }

    fn submit(&self, batches: Vec<CommandBatch>) -> Result<(), GpuError> {
        let mut inner = self.inner.lock();
        for batch in batches {
            log::trace!("executing batch '{}' ({} commands)", batch.name(), batch.len());
            for command in batch.into_commands() {
                inner.execute(command)?;
            }
        }
        inner.stats.submissions += 1;
        Ok(())
    }

    fn wait_idle(&self) {
        // Submission executes synchronously; nothing is ever in flight.
    }

    fn collect_garbage(&self) {
        let mut inner = self.inner.lock();
        let mut freed = 0u64;
        let mut collected = 0usize;

        for (_, buffer) in inner.buffers.retired.drain() {
            freed += buffer.data.len() as u64;
            collected += 1;
        }
        for (_, image) in inner.images.retired.drain() {
            let desc = &image.desc;
            freed += (0..desc.mip_levels)
                .map(|mip| desc.format.level_size([(desc.extent[0] >> mip).max(1), (desc.extent[1] >> mip).max(1)]))
                .sum::<u64>();
            collected += 1;
        }
        for (_, blas) in inner.blases.retired.drain() {
            freed += blas.size;
            collected += 1;
        }
        for (_, tlas) in inner.tlases.retired.drain() {
            freed += tlas.size;
            collected += 1;
        }

        inner.allocated = inner.allocated.saturating_sub(freed);
        inner.stats.collected += collected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::command::Access;
    use crate::gpu::backend::TextureFormat;

    #[test]
    fn test_copy_moves_bytes() {
        let backend = HeadlessBackend::default();
        let staging = backend.create_buffer(&BufferDesc::staging("staging", 8)).unwrap();
        let device = backend.create_buffer(&BufferDesc::device("device", 16)).unwrap();

        backend.write_buffer(staging, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let mut batch = CommandBatch::new("copy");
        batch.copy_buffer(staging, 4, device, 8, 4);
        batch.barrier(Access::TransferWrite, Access::ShaderRead);
        batch.destroy_buffer_deferred(staging);
        backend.submit(vec![batch]).unwrap();

        let data = backend.read_buffer(device).unwrap();
        assert_eq!(&data[8..12], &[5, 6, 7, 8]);
        assert_eq!(backend.live_buffer_count(), 1);

        let stats = backend.stats();
        assert_eq!(stats.buffer_copies, 1);
        assert_eq!(stats.barriers, 1);

        backend.collect_garbage();
        assert_eq!(backend.stats().collected, 1);
        assert_eq!(backend.allocated_bytes(), 16);
    }

    #[test]
    fn test_device_local_not_writable() {
        let backend = HeadlessBackend::default();
        let device = backend.create_buffer(&BufferDesc::device("device", 16)).unwrap();
        assert!(matches!(backend.write_buffer(device, 0, &[0; 4]), Err(GpuError::NotHostVisible(_))));
    }

    #[test]
    fn test_out_of_bounds_copy() {
        let backend = HeadlessBackend::default();
        let a = backend.create_buffer(&BufferDesc::staging("a", 8)).unwrap();
        let b = backend.create_buffer(&BufferDesc::device("b", 4)).unwrap();

        let mut batch = CommandBatch::new("oob");
        batch.copy_buffer(a, 0, b, 0, 8);
        assert!(matches!(backend.submit(vec![batch]), Err(GpuError::OutOfBounds { .. })));
    }

    #[test]
    fn test_memory_limit() {
        let backend = HeadlessBackend::new(HeadlessConfig {
            memory_limit: Some(100),
            ..Default::default()
        });
        assert!(backend.create_buffer(&BufferDesc::device("fits", 64)).is_ok());
        assert!(matches!(
            backend.create_buffer(&BufferDesc::device("too_big", 64)),
            Err(GpuError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_addresses_are_distinct_and_aligned() {
        let backend = HeadlessBackend::default();
        let a = backend.create_buffer(&BufferDesc::device("a", 10)).unwrap();
        let b = backend.create_buffer(&BufferDesc::device("b", 10)).unwrap();
        let addr_a = backend.buffer_device_address(a).unwrap();
        let addr_b = backend.buffer_device_address(b).unwrap();
        assert_ne!(addr_a, addr_b);
        assert_eq!(addr_a % ADDRESS_ALIGNMENT, 0);
        assert_eq!(addr_b % ADDRESS_ALIGNMENT, 0);
        assert!(addr_a != 0);
    }

    #[test]
    fn test_blas_and_tlas_build() {
        let backend = HeadlessBackend::default();

        // One triangle: 3 positions + 3 indices
        let geo = backend.create_buffer(&BufferDesc::staging("geo", 48)).unwrap();
        let geo_addr = backend.buffer_device_address(geo).unwrap();
        let scratch = backend.create_buffer(&BufferDesc::device("scratch", 4096)).unwrap();
        let scratch_addr = backend.buffer_device_address(scratch).unwrap();

        let geometry = BlasTriangleGeometry {
            vertex_data: geo_addr,
            vertex_stride: 12,
            max_vertex: 2,
            index_data: geo_addr + 36,
            triangle_count: 1,
            opaque: true,
        };
        let sizes = backend.blas_build_sizes(&[geometry]);
        assert_eq!(sizes.build_scratch_size, 256 + 32);

        let blas = backend.create_blas("blas", sizes.acceleration_structure_size).unwrap();
        let blas_addr = backend.blas_device_address(blas).unwrap();

        let instance = GpuBlasInstance::new([[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]], 5, 0xFF, 1, blas_addr);
        let instances = backend.create_buffer(&BufferDesc::staging("instances", 64)).unwrap();
        backend.write_buffer(instances, 0, bytemuck::bytes_of(&instance)).unwrap();
        let instances_addr = backend.buffer_device_address(instances).unwrap();

        let tlas = backend.create_tlas("tlas", 1024).unwrap();

        let mut batch = CommandBatch::new("build");
        batch.build_blas(blas, vec![geometry], scratch_addr);
        batch.barrier(Access::AccelerationStructureBuildWrite, Access::AccelerationStructureBuildRead);
        batch.build_tlas(tlas, instances_addr, 1, scratch_addr);
        backend.submit(vec![batch]).unwrap();

        assert!(backend.is_blas_built(blas));
        assert_eq!(backend.blas_triangle_count(blas), Some(1));
        let built = backend.tlas_instances(tlas).unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].custom_index(), 5);
        assert_eq!(built[0].blas_address, blas_addr);
    }

    #[test]
    fn test_tlas_rejects_unbuilt_blas() {
        let backend = HeadlessBackend::default();
        let scratch = backend.create_buffer(&BufferDesc::device("scratch", 256)).unwrap();
        let scratch_addr = backend.buffer_device_address(scratch).unwrap();
        let blas = backend.create_blas("blas", 256).unwrap();
        let instance = GpuBlasInstance::new([[0.0; 4]; 3], 0, 0xFF, 1, backend.blas_device_address(blas).unwrap());
        let instances = backend.create_buffer(&BufferDesc::staging("instances", 64)).unwrap();
        backend.write_buffer(instances, 0, bytemuck::bytes_of(&instance)).unwrap();
        let tlas = backend.create_tlas("tlas", 256).unwrap();

        let mut batch = CommandBatch::new("build");
        batch.build_tlas(tlas, backend.buffer_device_address(instances).unwrap(), 1, scratch_addr);
        assert!(matches!(backend.submit(vec![batch]), Err(GpuError::InvalidAddress(_))));
    }

    #[test]
    fn test_image_upload_tracking() {
        let backend = HeadlessBackend::default();
        let image = backend
            .create_image(&ImageDesc {
                name: "tex".into(),
                format: TextureFormat::Rgba8Srgb,
                extent: [2, 2],
                mip_levels: 2,
            })
            .unwrap();
        let staging = backend.create_buffer(&BufferDesc::staging("staging", 20)).unwrap();

        let mut batch = CommandBatch::new("upload");
        batch.copy_buffer_to_image(staging, 0, image, 0, [2, 2]);
        backend.submit(vec![batch]).unwrap();
        assert!(!backend.is_image_uploaded(image));

        let mut batch = CommandBatch::new("upload");
        batch.copy_buffer_to_image(staging, 16, image, 1, [1, 1]);
        backend.submit(vec![batch]).unwrap();
        assert!(backend.is_image_uploaded(image));
        assert_eq!(backend.stats().image_copies, 2);
    }
}
