//! The scene: manifest, entities, GPU tables and the per-frame build state

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::Affine3A;

use crate::accel::{AccelerationScheduler, BuildInputs, FrameBuildStats, ScratchAllocator};
use crate::asset::{SceneParser, SourceAsset, TextureTranscoder};
use crate::core::config::SceneConfig;
use crate::core::error::{GpuError, LoadManifestError};
use crate::core::types::Result;
use crate::gpu::{
    BufferDesc, BufferId, CommandBatch, DeviceAddress, GpuBackend, GpuMaterial, GpuMesh,
    GpuMeshGroup, ImageId, TlasId,
};
use crate::manifest::Manifest;
use crate::math::GpuTransform;
use crate::streaming::{DispatchSummary, JobContext, LoadDispatcher, MeshGroupReadiness, UploadBatch, UploadQueue};

use super::entity::EntityId;
use super::hierarchy::EntityStore;
use super::ingest::{IngestOutcome, IngestTarget, ingest_asset};

/// Device-local buffers mirroring the manifest, each sized for its table's full capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuTables {
    /// Local transform per entity slot
    pub entity_transforms: BufferId,
    /// World transform per entity slot
    pub entity_combined_transforms: BufferId,
    /// Mesh group index per entity slot
    pub entity_mesh_groups: BufferId,
    pub mesh_groups: BufferId,
    pub meshes: BufferId,
    /// Mesh indices of all mesh groups, one run per group
    pub mesh_indices: BufferId,
    pub materials: BufferId,
    /// Shared acceleration structure build scratch
    pub scratch: BufferId,
    pub mesh_indices_address: DeviceAddress,
    pub scratch_address: DeviceAddress,
}

impl GpuTables {
    fn create(backend: &dyn GpuBackend, config: &SceneConfig) -> std::result::Result<Self, GpuError> {
        let entities = config.max_entities as u64;
        let descs = [
            BufferDesc::device("entity transforms", entities * size_of::<GpuTransform>() as u64),
            BufferDesc::device("entity combined transforms", entities * size_of::<GpuTransform>() as u64),
            BufferDesc::device("entity mesh groups", entities * 4),
            BufferDesc::device("mesh groups", config.max_mesh_groups as u64 * size_of::<GpuMeshGroup>() as u64),
            BufferDesc::device("meshes", config.max_meshes as u64 * size_of::<GpuMesh>() as u64),
            BufferDesc::device("mesh indices", config.max_meshes as u64 * 4),
            BufferDesc::device("materials", config.max_materials as u64 * size_of::<GpuMaterial>() as u64),
            BufferDesc::device("build scratch", config.scratch_buffer_size),
        ];

        let mut ids = Vec::with_capacity(descs.len());
        for desc in &descs {
            match backend.create_buffer(desc) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        backend.destroy_buffer(id);
                    }
                    return Err(e);
                }
            }
        }

        let mut tables = Self {
            entity_transforms: ids[0],
            entity_combined_transforms: ids[1],
            entity_mesh_groups: ids[2],
            mesh_groups: ids[3],
            meshes: ids[4],
            mesh_indices: ids[5],
            materials: ids[6],
            scratch: ids[7],
            mesh_indices_address: 0,
            scratch_address: 0,
        };
        let addresses = backend
            .buffer_device_address(tables.mesh_indices)
            .and_then(|m| backend.buffer_device_address(tables.scratch).map(|s| (m, s)));
        match addresses {
            Ok((mesh_indices, scratch)) => {
                tables.mesh_indices_address = mesh_indices;
                tables.scratch_address = scratch;
                Ok(tables)
            }
            Err(e) => {
                tables.destroy(backend);
                Err(e)
            }
        }
    }

    pub fn buffers(&self) -> [BufferId; 8] {
        [
            self.entity_transforms,
            self.entity_combined_transforms,
            self.entity_mesh_groups,
            self.mesh_groups,
            self.meshes,
            self.mesh_indices,
            self.materials,
            self.scratch,
        ]
    }

    fn destroy(&self, backend: &dyn GpuBackend) {
        for buffer in self.buffers() {
            backend.destroy_buffer(buffer);
        }
    }
}

/// One scene. Owns every manifest table, the entity forest and all GPU
/// resources created on their behalf.
///
/// Everything here is driven from one thread. Background load jobs only
/// ever see the upload queue and the liveness flag.
pub struct Scene {
    config: SceneConfig,
    pub(crate) backend: Arc<dyn GpuBackend>,
    pub(crate) manifest: Manifest,
    pub(crate) entities: EntityStore,
    pub(crate) readiness: MeshGroupReadiness,
    uploads: Arc<UploadQueue>,
    alive: Arc<AtomicBool>,
    pub(crate) tables: GpuTables,
    accel: AccelerationScheduler,
    /// Duplicate completions, released once the frame that copied into them is submitted
    pub(crate) discarded_buffers: Vec<BufferId>,
    pub(crate) discarded_images: Vec<ImageId>,
    shut_down: bool,
}

impl Scene {
    /// Create an empty scene and allocate its GPU tables at full capacity.
    ///
    /// # Arguments
    /// * `config` - Table capacities and scratch size; rejected if invalid
    /// * `backend` - Device every table, image and acceleration structure is created on
    pub fn new(config: SceneConfig, backend: Arc<dyn GpuBackend>) -> Result<Self> {
        config.validate()?;
        let tables = GpuTables::create(backend.as_ref(), &config)?;
        let scratch = ScratchAllocator::new(
            tables.scratch_address,
            config.scratch_buffer_size,
            backend.min_scratch_alignment(),
        );
        log::info!(
            "Created scene: {} entities, {} mesh groups, {} meshes, {} materials, {} textures, {} byte scratch",
            config.max_entities,
            config.max_mesh_groups,
            config.max_meshes,
            config.max_materials,
            config.max_textures,
            config.scratch_buffer_size
        );

        Ok(Self {
            manifest: Manifest::new(&config),
            entities: EntityStore::new(config.max_entities),
            readiness: MeshGroupReadiness::new(),
            uploads: Arc::new(UploadQueue::new()),
            alive: Arc::new(AtomicBool::new(true)),
            accel: AccelerationScheduler::new(scratch),
            config,
            backend,
            tables,
            discarded_buffers: Vec::new(),
            discarded_images: Vec::new(),
            shut_down: false,
        })
    }

    // --- Loading ---

    /// Parse `root_path/asset_name`, ingest it and dispatch its load jobs.
    ///
    /// On error the scene is unchanged.
    ///
    /// # Arguments
    /// * `parser` - Format parser for the asset file
    /// * `root_path` - Directory the asset and its relative URIs resolve against
    /// * `asset_name` - File name under `root_path`
    /// * `loads` - Where the mesh and texture load jobs are queued
    pub fn load_manifest(
        &mut self,
        parser: &dyn SceneParser,
        root_path: &Path,
        asset_name: &str,
        loads: &LoadDispatcher,
    ) -> std::result::Result<EntityId, LoadManifestError> {
        let path = root_path.join(asset_name);
        let source = parser.parse(&path)?;
        let outcome = self.ingest(source, &path)?;
        self.dispatch_loads(loads, &outcome);
        Ok(outcome.root)
    }

    /// Add an already parsed asset to the manifest without dispatching loads.
    ///
    /// # Arguments
    /// * `source` - Parsed asset; kept alive by the asset record for later payload reads
    /// * `path` - Path the asset was loaded from, used for naming and logs
    pub fn ingest(
        &mut self,
        source: Arc<dyn SourceAsset>,
        path: &Path,
    ) -> std::result::Result<IngestOutcome, LoadManifestError> {
        ingest_asset(
            IngestTarget {
                manifest: &mut self.manifest,
                entities: &mut self.entities,
                readiness: &self.readiness,
            },
            source,
            path,
        )
    }

    /// Queue one load job per mesh and per referenced texture of `outcome`.
    ///
    /// # Arguments
    /// * `loads` - Job dispatcher and transcoder the jobs run with
    /// * `outcome` - Row ranges returned by [`Scene::ingest`]
    pub fn dispatch_loads(&self, loads: &LoadDispatcher, outcome: &IngestOutcome) -> DispatchSummary {
        let ctx = self.job_context(Arc::clone(loads.transcoder()));
        loads.dispatch(&ctx, &self.manifest, outcome.meshes.clone(), outcome.textures.clone())
    }

    /// Handles a load job needs to publish into this scene.
    pub fn job_context(&self, transcoder: Arc<dyn TextureTranscoder>) -> JobContext {
        JobContext {
            backend: Arc::clone(&self.backend),
            transcoder,
            uploads: Arc::clone(&self.uploads),
            alive: Arc::clone(&self.alive),
        }
    }

    // --- Hierarchy ---

    /// Replace an entity's local transform. Its whole subtree is refreshed on the next sync.
    ///
    /// # Arguments
    /// * `entity` - Entity to move
    /// * `local` - New transform relative to its parent
    ///
    /// Returns false if `entity` does not exist.
    pub fn set_local_transform(&mut self, entity: EntityId, local: Affine3A) -> bool {
        self.entities.set_local_transform(entity, local)
    }

    /// World transform of `entity` from its current local transforms, ignoring pending syncs.
    pub fn world_transform(&self, entity: EntityId) -> Affine3A {
        self.entities.world_transform(entity)
    }

    // --- Per frame ---

    /// Drain finished loads into copy commands.
    pub fn record_upload_commands(&self) -> UploadBatch {
        self.uploads.record_upload_commands()
    }

    /// Record BLAS builds for ready mesh groups and rebuild the TLAS.
    pub fn build_acceleration_structures(&mut self) -> Result<(CommandBatch, FrameBuildStats)> {
        self.accel.build_pending(BuildInputs {
            backend: self.backend.as_ref(),
            manifest: &mut self.manifest,
            entities: &self.entities,
            readiness: &self.readiness,
        })
    }

    /// Destroy duplicate upload targets set aside by the last sync.
    ///
    /// Call after the frame's command batches have been submitted.
    pub fn release_discarded(&mut self) {
        for buffer in self.discarded_buffers.drain(..) {
            self.backend.destroy_buffer(buffer);
        }
        for image in self.discarded_images.drain(..) {
            self.backend.destroy_image(image);
        }
    }

    /// True once no load is running or waiting and no ready group is waiting for its build.
    pub fn is_settled(&self) -> bool {
        self.uploads.in_flight() == 0 && self.uploads.pending_len() == 0 && self.readiness.ready_len() == 0
    }

    // --- Accessors ---

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn readiness(&self) -> &MeshGroupReadiness {
        &self.readiness
    }

    pub fn uploads(&self) -> &Arc<UploadQueue> {
        &self.uploads
    }

    pub fn tables(&self) -> &GpuTables {
        &self.tables
    }

    /// Top-level structure of the last build, for ray traversal.
    pub fn tlas(&self) -> Option<TlasId> {
        self.accel.tlas()
    }

    pub fn total_blas_built(&self) -> usize {
        self.accel.total_blas_built()
    }

    /// Meshes of `group` whose payload has arrived.
    pub fn loaded_meshes(&self, group: u32) -> Option<u32> {
        self.readiness.loaded_meshes(group)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    // --- Teardown ---

    /// Cancel outstanding loads and release every GPU resource the scene owns.
    ///
    /// Jobs still running see the cleared liveness flag and clean up after
    /// themselves. Calling this more than once is harmless.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.alive.store(false, Ordering::Release);

        let backend = Arc::clone(&self.backend);
        let backend = backend.as_ref();
        self.uploads.close_and_discard(backend);
        backend.wait_idle();
        self.release_discarded();

        let mut released = 0usize;
        for mesh in self.manifest.meshes.iter() {
            if let Some(runtime) = mesh.runtime {
                backend.destroy_buffer(runtime.buffer());
                released += 1;
            }
        }
        for group in self.manifest.mesh_groups.iter() {
            if let Some(blas) = group.blas {
                backend.destroy_blas(blas);
                released += 1;
            }
        }
        for texture in self.manifest.textures.iter() {
            for image in [texture.runtime, texture.secondary_runtime].into_iter().flatten() {
                backend.destroy_image(image);
                released += 1;
            }
        }
        if let Some(tlas) = self.accel.take_tlas() {
            backend.destroy_tlas(tlas);
            released += 1;
        }
        self.tables.destroy(backend);
        backend.collect_garbage();

        log::info!("Scene shut down, released {} resources plus GPU tables", released);
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{ImageTranscoder, MemoryAsset, MemoryParser, MeshData};
    use crate::core::error::Error;
    use crate::gpu::{HeadlessBackend, HeadlessConfig};
    use crate::streaming::{ImmediateDispatcher, JobDispatcher, JobPriority, WorkerPool};
    use crate::core::config::WorkerPoolConfig;
    use glam::Vec3;

    fn scene(backend: Arc<HeadlessBackend>) -> Scene {
        Scene::new(SceneConfig::small(), backend).unwrap()
    }

    fn immediate_loads() -> LoadDispatcher {
        LoadDispatcher::new(Arc::new(ImmediateDispatcher), Arc::new(ImageTranscoder::new()))
    }

    fn one_mesh_parser(path: &str) -> MemoryParser {
        let mut b = MemoryAsset::builder();
        let group = b.mesh_group("tri", vec![(MeshData::triangle(), None)]);
        b.node("tri", Affine3A::IDENTITY, Some(group));
        let parser = MemoryParser::new();
        parser.register(b.build(path));
        parser
    }

    #[test]
    fn test_tables_allocated_at_capacity() {
        let backend = Arc::new(HeadlessBackend::default());
        let scene = scene(backend.clone());
        let config = SceneConfig::small();
        assert_eq!(backend.live_buffer_count(), 8);
        let meshes = backend.read_buffer(scene.tables().meshes).unwrap();
        assert_eq!(meshes.len(), config.max_meshes as usize * 48);
        assert!(scene.tlas().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let backend = Arc::new(HeadlessBackend::default());
        let config = SceneConfig { max_meshes: 0, ..SceneConfig::small() };
        assert!(matches!(Scene::new(config, backend.clone()), Err(Error::Config(_))));
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_out_of_memory_releases_partial_tables() {
        let backend = Arc::new(HeadlessBackend::new(HeadlessConfig {
            memory_limit: Some(30_000),
            ..HeadlessConfig::default()
        }));
        let result = Scene::new(SceneConfig::small(), backend.clone());
        assert!(matches!(result, Err(Error::Gpu(GpuError::OutOfMemory { .. }))));
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_load_manifest_dispatches() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend.clone());
        let parser = one_mesh_parser("assets/tri.mem");

        let root = scene
            .load_manifest(&parser, Path::new("assets"), "tri.mem", &immediate_loads())
            .unwrap();
        assert_eq!(scene.entities().get(root).unwrap().name, "tri_0");
        assert_eq!(scene.uploads().pending_len(), 1);
        assert!(!scene.is_settled());
    }

    #[test]
    fn test_missing_file_leaves_scene_untouched() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend);
        let parser = MemoryParser::new();
        let err = scene
            .load_manifest(&parser, Path::new("assets"), "nope.gltf", &immediate_loads())
            .unwrap_err();
        assert!(matches!(err, LoadManifestError::FileNotFound(_)));
        assert!(scene.entities().is_empty());
        assert_eq!(scene.manifest().sizes(), Default::default());
    }

    #[test]
    fn test_set_local_transform_moves_subtree() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend);
        let parser = one_mesh_parser("a/tri.mem");
        let root = scene.load_manifest(&parser, Path::new("a"), "tri.mem", &immediate_loads()).unwrap();
        let child = scene.entities().children(root).next().unwrap();

        assert!(scene.set_local_transform(root, Affine3A::from_translation(Vec3::new(0.0, 2.0, 0.0))));
        let world = scene.world_transform(child);
        assert_eq!(Vec3::from(world.translation), Vec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend.clone());
        let parser = one_mesh_parser("a/tri.mem");
        scene.load_manifest(&parser, Path::new("a"), "tri.mem", &immediate_loads()).unwrap();
        let (batch, _) = scene.build_acceleration_structures().unwrap();
        backend.submit(vec![batch]).unwrap();

        scene.shutdown();
        assert!(!scene.is_alive());
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_tlas_count(), 0);
        assert_eq!(backend.allocated_bytes(), 0);

        // Idempotent, and Drop after shutdown is a no-op
        scene.shutdown();
    }

    #[test]
    fn test_jobs_after_shutdown_clean_up() {
        let backend = Arc::new(HeadlessBackend::default());
        let pool = Arc::new(WorkerPool::new(&WorkerPoolConfig { threads: 1 }).unwrap());
        let loads = LoadDispatcher::new(pool.clone(), Arc::new(ImageTranscoder::new()));
        let mut scene = scene(backend.clone());

        // Hold the only worker so the load job cannot start before shutdown
        let (release, gate) = std::sync::mpsc::channel::<()>();
        pool.dispatch(Box::new(move || {
            let _ = gate.recv();
        }), JobPriority::High);

        let parser = one_mesh_parser("a/tri.mem");
        scene.load_manifest(&parser, Path::new("a"), "tri.mem", &loads).unwrap();
        scene.shutdown();
        release.send(()).unwrap();
        pool.wait_idle();

        assert_eq!(scene.uploads().in_flight(), 0);
        assert_eq!(scene.uploads().pending_len(), 0);
        assert_eq!(backend.live_buffer_count(), 0);
    }
}
