//! Bottom-level builds under a scratch budget and the per-frame top-level rebuild.
//!
//! A mesh group moves `NotReady -> Ready -> Built`. It becomes ready when the
//! last of its meshes is patched into the manifest, and it is built in the
//! first frame whose remaining scratch budget can hold its build. Groups that
//! do not fit go back to the head of the ready queue and the frame stops
//! popping, so builds happen strictly in readiness order.
//!
//! The top-level structure is rebuilt from scratch every frame over every
//! entity whose mesh group has a built BLAS.

use crate::core::error::Error;
use crate::core::types::Result;
use crate::gpu::{
    Access, BlasTriangleGeometry, BufferDesc, CommandBatch, DeviceAddress, GpuBackend,
    GpuBlasInstance, TlasId,
};
use crate::manifest::Manifest;
use crate::math::align_up;
use crate::math::transform::to_instance;
use crate::scene::EntityStore;
use crate::streaming::MeshGroupReadiness;

use super::scratch::ScratchAllocator;

/// Acceleration structure storage sizes are rounded up to this.
pub const AS_SIZE_ALIGNMENT: u64 = 256;
/// Visibility mask of every instance
pub const INSTANCE_MASK: u8 = 0xFF;
/// Hit group record used by mesh instances
pub const INSTANCE_SBT_OFFSET: u32 = 1;
/// Smallest instance buffer ever allocated, so an empty scene still has a valid address
pub const MIN_INSTANCE_BUFFER_SIZE: u64 = 64;

const VERTEX_STRIDE: u64 = 12;

/// What one frame's build pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameBuildStats {
    pub blas_built: usize,
    /// A ready group was pushed back for lack of scratch
    pub requeued: bool,
    pub tlas_instances: u32,
    /// Peak scratch usage this frame
    pub scratch_used: u64,
}

/// State the scheduler reads and updates each frame.
pub struct BuildInputs<'a> {
    pub backend: &'a dyn GpuBackend,
    pub manifest: &'a mut Manifest,
    pub entities: &'a EntityStore,
    pub readiness: &'a MeshGroupReadiness,
}

pub struct AccelerationScheduler {
    scratch: ScratchAllocator,
    tlas: Option<TlasId>,
    total_blas_built: usize,
}

impl AccelerationScheduler {
    /// Create a scheduler with no TLAS yet.
    ///
    /// # Arguments
    /// * `scratch` - Allocator over the scene's shared build scratch buffer
    pub fn new(scratch: ScratchAllocator) -> Self {
        Self { scratch, tlas: None, total_blas_built: 0 }
    }

    /// Current top-level structure, if one has been built.
    pub fn tlas(&self) -> Option<TlasId> {
        self.tlas
    }

    pub fn total_blas_built(&self) -> usize {
        self.total_blas_built
    }

    pub fn scratch(&self) -> &ScratchAllocator {
        &self.scratch
    }

    /// Hand the current top-level structure to the caller for destruction.
    pub(crate) fn take_tlas(&mut self) -> Option<TlasId> {
        self.tlas.take()
    }

    /// Record this frame's BLAS builds followed by the TLAS rebuild.
    ///
    /// Fails if a single build needs more scratch than the whole buffer holds,
    /// or if the backend cannot allocate.
    ///
    /// # Arguments
    /// * `inputs` - Backend, manifest, entities and readiness queue for this frame
    pub fn build_pending(&mut self, inputs: BuildInputs<'_>) -> Result<(CommandBatch, FrameBuildStats)> {
        let BuildInputs { backend, manifest, entities, readiness } = inputs;
        let mut batch = CommandBatch::new("acceleration structures");
        let mut stats = FrameBuildStats::default();
        self.scratch.reset();

        while let Some(group) = readiness.pop_ready() {
            assert!(
                readiness.is_fully_loaded(group),
                "mesh group {} scheduled for BLAS build before all meshes loaded",
                group
            );
            let entry = &manifest.mesh_groups[group];
            assert!(entry.blas.is_none(), "mesh group {} built twice", group);

            let geometries = group_geometries(manifest, group);
            let sizes = backend.blas_build_sizes(&geometries);

            if !self.scratch.fits_when_empty(sizes.build_scratch_size) {
                return Err(Error::ScratchBudget {
                    what: format!("BLAS of mesh group '{}'", entry.name),
                    required: sizes.build_scratch_size,
                    capacity: self.scratch.capacity(),
                });
            }
            let Some(scratch) = self.scratch.allocate(sizes.build_scratch_size) else {
                readiness.requeue_front(group);
                stats.requeued = true;
                log::debug!(
                    "Mesh group {} needs {} scratch bytes, {} used; deferred to next frame",
                    group,
                    sizes.build_scratch_size,
                    self.scratch.used()
                );
                break;
            };

            let name = format!("blas {}", entry.name);
            let blas = backend.create_blas(&name, align_up(sizes.acceleration_structure_size, AS_SIZE_ALIGNMENT))?;
            batch.build_blas(blas, geometries, scratch);
            manifest.mesh_groups[group].blas = Some(blas);
            stats.blas_built += 1;
        }

        batch.barrier(Access::AccelerationStructureBuildWrite, Access::AccelerationStructureBuildRead);
        log::debug!("Issued {} BLAS builds", stats.blas_built);
        self.total_blas_built += stats.blas_built;

        // The barrier above orders the TLAS build after every BLAS build, so scratch is reused from the start
        self.scratch.rewind();
        stats.tlas_instances = self.record_tlas_build(backend, manifest, entities, &mut batch)?;
        stats.scratch_used = self.scratch.high_water();

        Ok((batch, stats))
    }

    fn record_tlas_build(
        &mut self,
        backend: &dyn GpuBackend,
        manifest: &Manifest,
        entities: &EntityStore,
        batch: &mut CommandBatch,
    ) -> Result<u32> {
        let mut instances = Vec::new();
        for (id, entity) in entities.iter() {
            let Some(blas) = entity
                .mesh_group
                .and_then(|g| manifest.mesh_groups.get(g))
                .and_then(|g| g.blas)
            else {
                continue;
            };
            instances.push(GpuBlasInstance::new(
                to_instance(&entity.world),
                id.index(),
                INSTANCE_MASK,
                INSTANCE_SBT_OFFSET,
                backend.blas_device_address(blas)?,
            ));
        }
        let count = instances.len() as u32;

        let sizes = backend.tlas_build_sizes(count);
        let capacity = self.scratch.capacity();
        let scratch_exceeded = || Error::ScratchBudget {
            what: "top-level acceleration structure".into(),
            required: sizes.build_scratch_size,
            capacity,
        };
        if !self.scratch.fits_when_empty(sizes.build_scratch_size) {
            return Err(scratch_exceeded());
        }
        let scratch = self.scratch.allocate(sizes.build_scratch_size).ok_or_else(scratch_exceeded)?;

        let bytes: &[u8] = bytemuck::cast_slice(&instances);
        let buffer_size = (bytes.len() as u64).max(MIN_INSTANCE_BUFFER_SIZE);
        let instance_buffer = backend.create_buffer(&BufferDesc::staging("tlas instances", buffer_size))?;
        let created = backend
            .write_buffer(instance_buffer, 0, bytes)
            .and_then(|_| backend.buffer_device_address(instance_buffer))
            .and_then(|address| {
                let size = align_up(sizes.acceleration_structure_size, AS_SIZE_ALIGNMENT);
                backend.create_tlas("scene tlas", size).map(|tlas| (tlas, address))
            });
        let (tlas, instance_address): (TlasId, DeviceAddress) = match created {
            Ok(created) => created,
            Err(e) => {
                backend.destroy_buffer(instance_buffer);
                return Err(e.into());
            }
        };

        // The previous structure stays current until its replacement exists
        if let Some(old) = self.tlas.replace(tlas) {
            backend.destroy_tlas(old);
        }

        batch.build_tlas(tlas, instance_address, count, scratch);
        batch.destroy_buffer_deferred(instance_buffer);
        batch.barrier(Access::AccelerationStructureBuildWrite, Access::ShaderRead);

        Ok(count)
    }
}

/// Triangle geometry of every mesh in `group`. The group must be fully loaded.
fn group_geometries(manifest: &Manifest, group: u32) -> Vec<BlasTriangleGeometry> {
    manifest
        .group_meshes(group)
        .iter()
        .map(|&mesh| {
            let runtime = manifest.meshes[mesh].runtime.unwrap_or_else(|| {
                panic!("mesh {} of ready mesh group {} has no runtime payload", mesh, group)
            });
            BlasTriangleGeometry {
                vertex_data: runtime.vertex_positions,
                vertex_stride: VERTEX_STRIDE,
                max_vertex: runtime.vertex_count.saturating_sub(1),
                index_data: runtime.indices,
                triangle_count: runtime.index_count / 3,
                opaque: true,
            }
        })
        .collect()
}
