//! Per-frame driver: uploads, manifest sync and acceleration structure builds

use crate::core::types::Result;
use crate::scene::Scene;

/// What one frame did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub mesh_uploads: usize,
    pub texture_uploads: usize,
    pub entities_flushed: usize,
    pub blas_built: usize,
    pub tlas_instances: u32,
    /// A ready mesh group waited for scratch space
    pub requeued: bool,
}

/// Runs the fixed per-frame sequence against one scene.
#[derive(Debug, Default)]
pub struct FrameDriver {
    frame: u64,
}

impl FrameDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames run so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Record and submit one frame.
    ///
    /// Uploads come first, then the manifest sync (which consumes the upload
    /// completions), then the BLAS and TLAS builds. The three batches are
    /// submitted together in that order.
    pub fn run_frame(&mut self, scene: &mut Scene) -> Result<FrameStats> {
        let uploads = scene.record_upload_commands();
        let entities_flushed = scene.entities().pending_len();
        let sync = scene.record_gpu_manifest_update(&uploads.meshes, &uploads.textures)?;
        let (build, build_stats) = scene.build_acceleration_structures()?;

        scene.backend().submit(vec![uploads.commands, sync, build])?;
        scene.release_discarded();
        scene.backend().collect_garbage();

        let stats = FrameStats {
            frame: self.frame,
            mesh_uploads: uploads.meshes.len(),
            texture_uploads: uploads.textures.len(),
            entities_flushed,
            blas_built: build_stats.blas_built,
            tlas_instances: build_stats.tlas_instances,
            requeued: build_stats.requeued,
        };
        self.frame += 1;

        if stats.mesh_uploads + stats.texture_uploads + stats.blas_built > 0 {
            log::debug!(
                "Frame {}: {} mesh uploads, {} texture uploads, {} entities, {} BLAS, {} instances",
                stats.frame,
                stats.mesh_uploads,
                stats.texture_uploads,
                stats.entities_flushed,
                stats.blas_built,
                stats.tlas_instances
            );
        }
        Ok(stats)
    }

    /// Run frames until the scene has settled or `max_frames` have run.
    pub fn run_until_settled(&mut self, scene: &mut Scene, max_frames: u64) -> Result<Vec<FrameStats>> {
        let mut frames = Vec::new();
        for _ in 0..max_frames {
            frames.push(self.run_frame(scene)?);
            if scene.is_settled() {
                break;
            }
        }
        Ok(frames)
    }
}
