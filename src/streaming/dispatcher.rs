//! Fan-out of load jobs for freshly ingested manifest rows

use std::ops::Range;
use std::sync::Arc;

use crate::asset::TextureTranscoder;
use crate::core::error::AssetLoadError;
use crate::manifest::Manifest;

use super::jobs::{JobContext, JobOutcome, MeshLoadJob, TextureLoadJob};
use super::pool::{JobDispatcher, JobPriority};

/// Jobs issued for one ingest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub meshes: usize,
    pub textures: usize,
    /// Textures no material references
    pub skipped_textures: usize,
}

/// Submits one low priority job per new mesh and per referenced texture.
pub struct LoadDispatcher {
    jobs: Arc<dyn JobDispatcher>,
    transcoder: Arc<dyn TextureTranscoder>,
}

impl LoadDispatcher {
    pub fn new(jobs: Arc<dyn JobDispatcher>, transcoder: Arc<dyn TextureTranscoder>) -> Self {
        Self { jobs, transcoder }
    }

    pub fn transcoder(&self) -> &Arc<dyn TextureTranscoder> {
        &self.transcoder
    }

    /// Dispatch loads for the given global mesh and texture index ranges.
    pub fn dispatch(
        &self,
        ctx: &JobContext,
        manifest: &Manifest,
        meshes: Range<u32>,
        textures: Range<u32>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for mesh in meshes {
            let entry = &manifest.meshes[mesh];
            let record = &manifest.assets[entry.asset as usize];
            let label = format!(
                "mesh {} ({} mesh group {} primitive {})",
                mesh,
                record.path.display(),
                entry.asset_local_mesh_group,
                entry.asset_local_primitive
            );
            let job = MeshLoadJob {
                source: Arc::clone(&record.source),
                mesh,
                asset_local_mesh_group: entry.asset_local_mesh_group,
                asset_local_primitive: entry.asset_local_primitive,
                material: entry.material,
            };
            self.spawn(ctx, label, move |ctx| job.run(ctx));
            summary.meshes += 1;
        }

        for texture in textures {
            let entry = &manifest.textures[texture];
            let record = &manifest.assets[entry.asset as usize];
            if entry.materials.is_empty() {
                log::warn!(
                    "Skipping texture '{}' ({} texture {}): not referenced by any material",
                    entry.name,
                    record.path.display(),
                    entry.asset_local_index
                );
                summary.skipped_textures += 1;
                continue;
            }
            let label = format!(
                "texture {} '{}' ({} image {})",
                texture,
                entry.name,
                record.path.display(),
                entry.asset_local_image
            );
            let job = TextureLoadJob {
                source: Arc::clone(&record.source),
                texture,
                name: entry.name.clone(),
                asset_local_image: entry.asset_local_image,
                kind: entry.kind,
            };
            self.spawn(ctx, label, move |ctx| job.run(ctx));
            summary.textures += 1;
        }

        log::debug!(
            "Dispatched {} mesh and {} texture loads ({} textures skipped)",
            summary.meshes,
            summary.textures,
            summary.skipped_textures
        );
        summary
    }

    fn spawn<F>(&self, ctx: &JobContext, label: String, work: F)
    where
        F: FnOnce(&JobContext) -> Result<JobOutcome, AssetLoadError> + Send + 'static,
    {
        let ctx = ctx.clone();
        let ticket = ctx.uploads.begin_job();
        self.jobs.dispatch(
            Box::new(move || match work(&ctx) {
                Ok(JobOutcome::Published) => ticket.succeed(),
                Ok(JobOutcome::Cancelled) => {
                    log::debug!("Load of {} cancelled", label);
                    ticket.succeed();
                }
                Err(e) => {
                    log::error!("Failed to load {}: {}", label, e);
                }
            }),
            JobPriority::Low,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use crate::asset::{ImageBlob, ImageTranscoder, MaterialDesc, MemoryAsset, MeshData, SourceAsset};
    use crate::core::config::{SceneConfig, WorkerPoolConfig};
    use crate::gpu::HeadlessBackend;
    use crate::manifest::{AssetRecord, MeshEntry, TextureEntry, TextureKind};
    use crate::scene::EntityId;
    use crate::streaming::{ImmediateDispatcher, UploadQueue, WorkerPool};

    fn context() -> JobContext {
        JobContext {
            backend: Arc::new(HeadlessBackend::default()),
            transcoder: Arc::new(ImageTranscoder::new()),
            uploads: Arc::new(UploadQueue::new()),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Manifest with one asset of `meshes` triangles and one unreferenced texture.
    fn manifest_with(source: Arc<dyn SourceAsset>, meshes: u32) -> Manifest {
        let mut manifest = Manifest::new(&SceneConfig::small());
        for primitive in 0..meshes {
            manifest
                .meshes
                .push(MeshEntry {
                    asset: 0,
                    asset_local_mesh_group: 0,
                    asset_local_primitive: primitive,
                    mesh_group: 0,
                    material: None,
                    runtime: None,
                })
                .unwrap();
        }
        manifest
            .textures
            .push(TextureEntry {
                name: "orphan".into(),
                kind: TextureKind::None,
                asset: 0,
                asset_local_index: 0,
                asset_local_image: 0,
                materials: Vec::new(),
                runtime: None,
                secondary_runtime: None,
            })
            .unwrap();
        manifest.assets.push(AssetRecord {
            path: source.path().to_path_buf(),
            source,
            texture_offset: 0,
            material_offset: 0,
            mesh_group_offset: 0,
            mesh_offset: 0,
            root_entity: EntityId(0),
        });
        manifest
    }

    fn triangles(count: usize) -> Arc<dyn SourceAsset> {
        let mut b = MemoryAsset::builder();
        b.texture("orphan", ImageBlob::default());
        b.mesh_group("g", (0..count).map(|_| (MeshData::triangle(), None)).collect());
        Arc::new(b.build("tris.mem"))
    }

    #[test]
    fn test_dispatch_immediate() {
        let ctx = context();
        let manifest = manifest_with(triangles(3), 3);
        let loads = LoadDispatcher::new(Arc::new(ImmediateDispatcher), Arc::new(ImageTranscoder::new()));

        let summary = loads.dispatch(&ctx, &manifest, 0..3, 0..1);
        assert_eq!(summary, DispatchSummary { meshes: 3, textures: 0, skipped_textures: 1 });
        assert_eq!(ctx.uploads.pending_len(), 3);
        assert_eq!(ctx.uploads.in_flight(), 0);
        assert_eq!(ctx.uploads.completed(), 3);
    }

    #[test]
    fn test_failed_job_counted() {
        let ctx = context();
        // Manifest claims 2 meshes, the source only has 1
        let manifest = manifest_with(triangles(1), 2);
        let loads = LoadDispatcher::new(Arc::new(ImmediateDispatcher), Arc::new(ImageTranscoder::new()));

        loads.dispatch(&ctx, &manifest, 0..2, 0..0);
        assert_eq!(ctx.uploads.failed(), 1);
        assert_eq!(ctx.uploads.pending_len(), 1);
    }

    #[test]
    fn test_dispatch_on_worker_pool() {
        let ctx = context();
        let manifest = manifest_with(triangles(16), 16);
        let pool = Arc::new(WorkerPool::new(&WorkerPoolConfig { threads: 3 }).unwrap());
        let loads = LoadDispatcher::new(pool.clone(), Arc::new(ImageTranscoder::new()));

        loads.dispatch(&ctx, &manifest, 0..16, 0..0);
        pool.wait_idle();
        assert_eq!(ctx.uploads.in_flight(), 0);
        assert_eq!(ctx.uploads.pending_len(), 16);
    }

    #[test]
    fn test_referenced_texture_dispatched() {
        let ctx = context();
        let mut b = MemoryAsset::builder();
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        let tex = b.texture("albedo", ImageBlob { bytes: bytes.into_inner(), mime_type: None });
        b.material(MaterialDesc { diffuse_texture: Some(tex), ..Default::default() });
        let mut manifest = manifest_with(Arc::new(b.build("tex.mem")), 0);
        manifest.textures[0].kind = TextureKind::Diffuse;
        manifest.textures[0].materials.push(0);

        let loads = LoadDispatcher::new(Arc::new(ImmediateDispatcher), Arc::new(ImageTranscoder::new()));
        let summary = loads.dispatch(&ctx, &manifest, 0..0, 0..1);
        assert_eq!(summary.textures, 1);
        assert_eq!(ctx.uploads.pending_len(), 1);
    }
}
