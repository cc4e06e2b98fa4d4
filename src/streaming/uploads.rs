//! Completed loads waiting for their copy commands.
//!
//! Load jobs finish by writing their payload into a host-visible staging
//! buffer and publishing a pending upload here. Once per frame the main thread
//! drains the queue into copy commands plus the list of completions the
//! manifest sync patches into the GPU tables.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::gpu::{Access, BufferId, CommandBatch, GpuBackend, GpuMesh, ImageId, TextureFormat};

/// One mip level inside a staging buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MipRegion {
    pub staging_offset: u64,
    pub mip_level: u32,
    pub extent: [u32; 2],
}

/// Image plus the staging regions filling it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageUpload {
    pub image: ImageId,
    pub format: TextureFormat,
    pub regions: Vec<MipRegion>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMeshUpload {
    pub mesh: u32,
    pub staging: BufferId,
    pub size: u64,
    /// Record pointing into the destination buffer
    pub runtime: GpuMesh,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTextureUpload {
    pub texture: u32,
    pub staging: BufferId,
    pub primary: ImageUpload,
    pub secondary: Option<ImageUpload>,
}

/// A mesh whose data copy has been recorded this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshUpload {
    pub mesh: u32,
    pub runtime: GpuMesh,
}

/// A texture whose image copies have been recorded this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureUpload {
    pub texture: u32,
    pub image: ImageId,
    pub format: TextureFormat,
    pub secondary: Option<ImageId>,
}

/// Output of [`UploadQueue::record_upload_commands`].
#[derive(Debug, Default)]
pub struct UploadBatch {
    pub commands: CommandBatch,
    pub meshes: Vec<MeshUpload>,
    pub textures: Vec<TextureUpload>,
}

#[derive(Debug, Default)]
struct Pending {
    meshes: Vec<PendingMeshUpload>,
    textures: Vec<PendingTextureUpload>,
    closed: bool,
}

/// Mutex-guarded list of finished loads, plus job bookkeeping.
#[derive(Debug, Default)]
pub struct UploadQueue {
    pending: Mutex<Pending>,
    in_flight: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Marks one dispatched job as in flight. A ticket dropped without
/// [`succeed`](Self::succeed), including by a panicking job, counts as failed.
pub struct JobTicket {
    uploads: Arc<UploadQueue>,
    succeeded: bool,
}

impl JobTicket {
    pub fn succeed(mut self) {
        self.succeeded = true;
    }
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        let counter = if self.succeeded { &self.uploads.completed } else { &self.uploads.failed };
        counter.fetch_add(1, Ordering::AcqRel);
        self.uploads.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a finished mesh load. Hands the upload back if the queue was closed.
    pub fn push_mesh(&self, upload: PendingMeshUpload) -> Result<(), PendingMeshUpload> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(upload);
        }
        pending.meshes.push(upload);
        Ok(())
    }

    /// Publish a finished texture load. Hands the upload back if the queue was closed.
    pub fn push_texture(&self, upload: PendingTextureUpload) -> Result<(), PendingTextureUpload> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(upload);
        }
        pending.textures.push(upload);
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        let pending = self.pending.lock();
        pending.meshes.len() + pending.textures.len()
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    // --- Job bookkeeping ---

    /// Count a job as in flight until the returned ticket is dropped.
    pub fn begin_job(self: &Arc<Self>) -> JobTicket {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        JobTicket { uploads: Arc::clone(self), succeeded: false }
    }

    /// Jobs dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Acquire)
    }

    // --- Per frame drain ---

    /// Drain everything published so far into copy commands.
    ///
    /// Every staging buffer is destroyed deferred right after its copies, and
    /// a final barrier makes the uploaded data visible to later work.
    pub fn record_upload_commands(&self) -> UploadBatch {
        let (meshes, textures) = {
            let mut pending = self.pending.lock();
            (std::mem::take(&mut pending.meshes), std::mem::take(&mut pending.textures))
        };

        let mut batch = UploadBatch {
            commands: CommandBatch::new("upload"),
            meshes: Vec::with_capacity(meshes.len()),
            textures: Vec::with_capacity(textures.len()),
        };
        if meshes.is_empty() && textures.is_empty() {
            return batch;
        }

        for upload in meshes {
            batch.commands.copy_buffer(upload.staging, 0, upload.runtime.buffer(), 0, upload.size);
            batch.commands.destroy_buffer_deferred(upload.staging);
            batch.meshes.push(MeshUpload { mesh: upload.mesh, runtime: upload.runtime });
        }

        for upload in textures {
            let images = std::iter::once(&upload.primary).chain(upload.secondary.as_ref());
            for image in images {
                for region in &image.regions {
                    batch.commands.copy_buffer_to_image(
                        upload.staging,
                        region.staging_offset,
                        image.image,
                        region.mip_level,
                        region.extent,
                    );
                }
            }
            batch.commands.destroy_buffer_deferred(upload.staging);
            batch.textures.push(TextureUpload {
                texture: upload.texture,
                image: upload.primary.image,
                format: upload.primary.format,
                secondary: upload.secondary.as_ref().map(|s| s.image),
            });
        }

        batch.commands.barrier(Access::TransferWrite, Access::ShaderRead);
        log::debug!("Recorded {} mesh and {} texture uploads", batch.meshes.len(), batch.textures.len());
        batch
    }

    /// Refuse further uploads and destroy everything still undelivered.
    pub fn close_and_discard(&self, backend: &dyn GpuBackend) {
        let (meshes, textures) = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            (std::mem::take(&mut pending.meshes), std::mem::take(&mut pending.textures))
        };
        for upload in &meshes {
            backend.destroy_buffer(upload.staging);
            backend.destroy_buffer(upload.runtime.buffer());
        }
        for upload in &textures {
            backend.destroy_buffer(upload.staging);
            backend.destroy_image(upload.primary.image);
            if let Some(secondary) = &upload.secondary {
                backend.destroy_image(secondary.image);
            }
        }
        if !meshes.is_empty() || !textures.is_empty() {
            log::debug!("Discarded {} undelivered uploads", meshes.len() + textures.len());
        }
    }
}
