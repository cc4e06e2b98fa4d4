//! Per-frame manifest to GPU table synchronization

use std::collections::BTreeSet;

use bytemuck::Pod;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::gpu::{
    Access, BufferDesc, BufferId, CommandBatch, GpuBackend, GpuMaterial, GpuMesh, GpuMeshGroup,
    INVALID_MANIFEST_INDEX, TextureFormat,
};
use crate::math::GpuTransform;
use crate::math::transform::to_gpu;
use crate::streaming::{MeshUpload, TextureUpload};

use super::manager::Scene;

/// Offset alignment of every copy inside the sync staging buffer.
const STAGING_ALIGNMENT: usize = 16;

enum StagedOp {
    Copy { src_offset: u64, dst: BufferId, dst_offset: u64, size: u64 },
    Barrier(Access, Access),
}

/// Collects record writes into one staging buffer and the copies out of it.
#[derive(Default)]
struct StagedBatch {
    bytes: Vec<u8>,
    ops: Vec<StagedOp>,
}

impl StagedBatch {
    fn copy<T: Pod>(&mut self, data: &[T], dst: BufferId, dst_offset: u64) {
        if data.is_empty() {
            return;
        }
        let start = self.bytes.len().next_multiple_of(STAGING_ALIGNMENT);
        self.bytes.resize(start, 0);
        self.bytes.extend_from_slice(bytemuck::cast_slice(data));
        self.ops.push(StagedOp::Copy {
            src_offset: start as u64,
            dst,
            dst_offset,
            size: (self.bytes.len() - start) as u64,
        });
    }

    fn barrier(&mut self, src: Access, dst: Access) {
        self.ops.push(StagedOp::Barrier(src, dst));
    }

    fn finish(self, backend: &dyn GpuBackend, name: &str) -> Result<CommandBatch> {
        let mut batch = CommandBatch::new(name);
        let staging = if self.bytes.is_empty() {
            None
        } else {
            let staging = backend.create_buffer(&BufferDesc::staging(
                format!("{} staging", name),
                self.bytes.len() as u64,
            ))?;
            if let Err(e) = backend.write_buffer(staging, 0, &self.bytes) {
                backend.destroy_buffer(staging);
                return Err(Error::Gpu(e));
            }
            Some(staging)
        };

        for op in self.ops {
            match (op, staging) {
                (StagedOp::Copy { src_offset, dst, dst_offset, size }, Some(src)) => {
                    batch.copy_buffer(src, src_offset, dst, dst_offset, size);
                }
                (StagedOp::Copy { .. }, None) => {}
                (StagedOp::Barrier(src, dst), _) => batch.barrier(src, dst),
            }
        }
        if let Some(staging) = staging {
            batch.destroy_buffer_deferred(staging);
        }
        Ok(batch)
    }
}

impl Scene {
    /// Record the commands that bring the GPU tables up to date with the manifest.
    ///
    /// In order: entity transforms of every dirty or modified entity, the
    /// unsynced tail of each manifest table, texture completions patched into
    /// their materials, then mesh completions (which also advance mesh group
    /// readiness). Barriers separate the phases. Afterwards every table is
    /// marked synced.
    ///
    /// # Arguments
    /// * `meshes` - Mesh completions from this frame's upload batch
    /// * `textures` - Texture completions from this frame's upload batch
    pub fn record_gpu_manifest_update(
        &mut self,
        meshes: &[MeshUpload],
        textures: &[TextureUpload],
    ) -> Result<CommandBatch> {
        let tables = self.tables;
        let mut staged = StagedBatch::default();

        // Entities
        let pending = self.entities.take_pending();
        let transform_stride = size_of::<GpuTransform>() as u64;
        for id in &pending {
            let world = self.entities.world_transform(*id);
            let Some(entity) = self.entities.get_mut(*id) else {
                continue;
            };
            entity.world = world;
            let row = id.index() as u64;
            staged.copy(&[to_gpu(&entity.local)], tables.entity_transforms, row * transform_stride);
            staged.copy(&[to_gpu(&world)], tables.entity_combined_transforms, row * transform_stride);
            let group = entity.mesh_group.unwrap_or(INVALID_MANIFEST_INDEX);
            staged.copy(&[group], tables.entity_mesh_groups, row * 4);
        }

        // Table growth
        let manifest = &self.manifest;
        let range = manifest.mesh_groups.unsynced();
        let groups: Vec<GpuMeshGroup> = manifest.mesh_groups.new_entries()
            .iter()
            .map(|g| GpuMeshGroup {
                mesh_indices: tables.mesh_indices_address + g.mesh_indices_offset as u64 * 4,
                count: g.mesh_count,
                _pad: 0,
            })
            .collect();
        staged.copy(&groups, tables.mesh_groups, range.start as u64 * size_of::<GpuMeshGroup>() as u64);

        let range = manifest.meshes.unsynced();
        let mesh_rows: Vec<GpuMesh> = manifest.meshes.new_entries()
            .iter()
            .map(|m| m.runtime.unwrap_or_else(|| GpuMesh::unloaded(m.material)))
            .collect();
        staged.copy(&mesh_rows, tables.meshes, range.start as u64 * size_of::<GpuMesh>() as u64);

        let range = manifest.materials.unsynced();
        let materials: Vec<GpuMaterial> = manifest.materials.new_entries()
            .iter()
            .map(|m| m.to_gpu(&manifest.textures))
            .collect();
        staged.copy(&materials, tables.materials, range.start as u64 * size_of::<GpuMaterial>() as u64);

        let range = manifest.mesh_indices.unsynced();
        staged.copy(manifest.mesh_indices.new_entries(), tables.mesh_indices, range.start as u64 * 4);

        staged.barrier(Access::TransferWrite, Access::TransferWrite);

        // Texture completions
        let mut touched = BTreeSet::new();
        for upload in textures {
            let Some(entry) = self.manifest.textures.get_mut(upload.texture) else {
                continue;
            };
            if entry.runtime.is_some() {
                log::warn!("Texture {} '{}' uploaded twice, discarding the copy", upload.texture, entry.name);
                self.discarded_images.push(upload.image);
                self.discarded_images.extend(upload.secondary);
                continue;
            }
            entry.runtime = Some(upload.image);
            entry.secondary_runtime = upload.secondary;
            let referencing = entry.materials.clone();

            for material in referencing {
                if let Some(m) = self.manifest.materials.get_mut(material) {
                    if m.normal == Some(upload.texture) {
                        m.normal_compressed_bc5_rg = upload.format == TextureFormat::Bc5RgUnorm;
                    }
                    touched.insert(material);
                }
            }
        }
        for material in touched {
            if let Some(m) = self.manifest.materials.get(material) {
                let record = m.to_gpu(&self.manifest.textures);
                staged.copy(&[record], tables.materials, material as u64 * size_of::<GpuMaterial>() as u64);
            }
        }

        staged.barrier(Access::TransferWrite, Access::TransferWrite);

        // Mesh completions
        for upload in meshes {
            let Some(entry) = self.manifest.meshes.get_mut(upload.mesh) else {
                continue;
            };
            if entry.runtime.is_some() {
                log::warn!("Mesh {} uploaded twice, discarding the copy", upload.mesh);
                self.discarded_buffers.push(upload.runtime.buffer());
                continue;
            }
            entry.runtime = Some(upload.runtime);
            let group = entry.mesh_group;
            staged.copy(&[upload.runtime], tables.meshes, upload.mesh as u64 * size_of::<GpuMesh>() as u64);
            if self.readiness.mark_mesh_loaded(group) {
                log::debug!("Mesh group {} fully loaded", group);
            }
        }

        staged.barrier(Access::TransferWrite, Access::ShaderRead);
        self.manifest.mark_synced();

        log::trace!(
            "Manifest sync: {} entities, {} mesh and {} texture completions",
            pending.len(),
            meshes.len(),
            textures.len()
        );
        staged.finish(self.backend.as_ref(), "manifest sync")
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use glam::{Affine3A, Quat, Vec3};

    use super::*;
    use crate::asset::{ImageBlob, MaterialDesc, MemoryAsset, MeshData};
    use crate::core::config::SceneConfig;
    use crate::gpu::{HeadlessBackend, ImageDesc};
    use crate::math::transform::from_gpu;
    use crate::scene::EntityId;

    fn scene(backend: Arc<HeadlessBackend>) -> Scene {
        Scene::new(SceneConfig::small(), backend).unwrap()
    }

    fn flush(scene: &mut Scene, backend: &HeadlessBackend, meshes: &[MeshUpload], textures: &[TextureUpload]) {
        let batch = scene.record_gpu_manifest_update(meshes, textures).unwrap();
        backend.submit(vec![batch]).unwrap();
        backend.collect_garbage();
    }

    /// root -> a -> b, each with its own translation and rotation.
    fn chain(scene: &mut Scene) -> (EntityId, Vec<Affine3A>) {
        let locals = vec![
            Affine3A::from_translation(Vec3::new(1.0, 0.0, 0.0)),
            Affine3A::from_rotation_translation(Quat::from_rotation_y(0.5), Vec3::new(0.0, 2.0, 0.0)),
            Affine3A::from_scale_rotation_translation(Vec3::splat(2.0), Quat::from_rotation_z(1.0), Vec3::new(0.0, 0.0, 3.0)),
        ];
        let mut b = MemoryAsset::builder();
        let a = b.node("a", locals[1], None);
        let leaf = b.node("b", locals[2], None);
        b.child(a, leaf);
        let outcome = scene.ingest(Arc::new(b.build("chain.mem")), Path::new("chain.mem")).unwrap();
        scene.set_local_transform(outcome.root, locals[0]);
        (outcome.root, locals)
    }

    #[test]
    fn test_world_transform_is_product_of_locals() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend.clone());
        let (root, locals) = chain(&mut scene);
        flush(&mut scene, &backend, &[], &[]);

        let a = scene.entities().children(root).next().unwrap();
        let b = scene.entities().children(a).next().unwrap();
        let expected = locals[0] * locals[1] * locals[2];

        let rows: Vec<GpuTransform> = backend
            .read_records(scene.tables().entity_combined_transforms, b.index() as usize, 1)
            .unwrap();
        assert!(from_gpu(&rows[0]).abs_diff_eq(expected, 1e-5));
        assert!(scene.entities().get(b).unwrap().world.abs_diff_eq(expected, 1e-5));

        let locals_gpu: Vec<GpuTransform> = backend
            .read_records(scene.tables().entity_transforms, b.index() as usize, 1)
            .unwrap();
        assert!(from_gpu(&locals_gpu[0]).abs_diff_eq(locals[2], 1e-6));
        assert_eq!(scene.entities().pending_len(), 0);
    }

    #[test]
    fn test_reflush_is_idempotent() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend.clone());
        let (root, locals) = chain(&mut scene);
        flush(&mut scene, &backend, &[], &[]);
        let before = backend.read_buffer(scene.tables().entity_combined_transforms).unwrap();

        scene.set_local_transform(root, locals[0]);
        assert_eq!(scene.entities().pending_len(), 3);
        flush(&mut scene, &backend, &[], &[]);
        let after = backend.read_buffer(scene.tables().entity_combined_transforms).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_moving_parent_updates_subtree() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend.clone());
        let (root, _) = chain(&mut scene);
        flush(&mut scene, &backend, &[], &[]);

        let moved = Affine3A::from_translation(Vec3::new(0.0, -10.0, 0.0));
        scene.set_local_transform(root, moved);
        flush(&mut scene, &backend, &[], &[]);

        let a = scene.entities().children(root).next().unwrap();
        let rows: Vec<GpuTransform> = backend
            .read_records(scene.tables().entity_combined_transforms, a.index() as usize, 1)
            .unwrap();
        let expected = moved * scene.entities().get(a).unwrap().local;
        assert!(from_gpu(&rows[0]).abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn test_only_new_rows_copied() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend.clone());

        let asset = |name: &str| {
            let mut b = MemoryAsset::builder();
            let g = b.mesh_group("g", vec![(MeshData::triangle(), None), (MeshData::triangle(), None)]);
            b.node("n", Affine3A::IDENTITY, Some(g));
            Arc::new(b.build(name))
        };
        scene.ingest(asset("first.mem"), Path::new("first.mem")).unwrap();
        let batch = scene.record_gpu_manifest_update(&[], &[]).unwrap();
        assert!(batch.commands().iter().any(|c| matches!(
            c,
            crate::gpu::Command::CopyBuffer { dst, dst_offset: 0, .. } if *dst == scene.tables().meshes
        )));
        backend.submit(vec![batch]).unwrap();

        scene.ingest(asset("second.mem"), Path::new("second.mem")).unwrap();
        let batch = scene.record_gpu_manifest_update(&[], &[]).unwrap();
        let mesh_copies: Vec<_> = batch
            .commands()
            .iter()
            .filter_map(|c| match c {
                crate::gpu::Command::CopyBuffer { dst, dst_offset, size, .. } if *dst == scene.tables().meshes => {
                    Some((*dst_offset, *size))
                }
                _ => None,
            })
            .collect();
        assert_eq!(mesh_copies, vec![(2 * 48, 2 * 48)]);
        backend.submit(vec![batch]).unwrap();

        let groups: Vec<GpuMeshGroup> = backend.read_records(scene.tables().mesh_groups, 1, 1).unwrap();
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].mesh_indices, scene.tables().mesh_indices_address + 8);

        // Nothing new: no table copies, only the phase barriers
        let batch = scene.record_gpu_manifest_update(&[], &[]).unwrap();
        assert_eq!(batch.copies_into(scene.tables().meshes), 0);
        assert_eq!(batch.barrier_count(), 3);
    }

    #[test]
    fn test_texture_completion_patches_materials() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend.clone());

        let mut b = MemoryAsset::builder();
        let normal = b.texture("normal", ImageBlob::default());
        b.material(MaterialDesc { normal_texture: Some(normal), ..Default::default() });
        b.material(MaterialDesc { normal_texture: Some(normal), ..Default::default() });
        scene.ingest(Arc::new(b.build("n.mem")), Path::new("n.mem")).unwrap();
        flush(&mut scene, &backend, &[], &[]);

        let image = backend
            .create_image(&ImageDesc {
                name: "normal".into(),
                format: TextureFormat::Bc5RgUnorm,
                extent: [4, 4],
                mip_levels: 1,
            })
            .unwrap();
        let upload = TextureUpload { texture: 0, image, format: TextureFormat::Bc5RgUnorm, secondary: None };
        flush(&mut scene, &backend, &[], &[upload]);

        let records: Vec<GpuMaterial> = backend.read_records(scene.tables().materials, 0, 2).unwrap();
        for record in &records {
            assert_eq!(record.normal(), image);
            assert_eq!(record.normal_compressed_bc5_rg, 1);
        }
        assert_eq!(scene.manifest().textures[0].runtime, Some(image));

        // A second completion for the same row is discarded, the first stays bound
        let copy = backend
            .create_image(&ImageDesc {
                name: "normal".into(),
                format: TextureFormat::Bc5RgUnorm,
                extent: [4, 4],
                mip_levels: 1,
            })
            .unwrap();
        let duplicate = TextureUpload { image: copy, ..upload };
        flush(&mut scene, &backend, &[], &[duplicate]);
        assert_eq!(scene.manifest().textures[0].runtime, Some(image));
        scene.release_discarded();
        assert_eq!(backend.live_image_count(), 1);
    }

    #[test]
    fn test_mesh_completion_counts_once() {
        let backend = Arc::new(HeadlessBackend::default());
        let mut scene = scene(backend.clone());

        let mut b = MemoryAsset::builder();
        let g = b.mesh_group("g", vec![(MeshData::triangle(), None), (MeshData::triangle(), None)]);
        b.node("n", Affine3A::IDENTITY, Some(g));
        scene.ingest(Arc::new(b.build("m.mem")), Path::new("m.mem")).unwrap();
        flush(&mut scene, &backend, &[], &[]);

        let runtime = |vertex_count| {
            let buffer = backend.create_buffer(&BufferDesc::device("mesh", 64)).unwrap();
            GpuMesh { mesh_buffer: buffer.0, vertex_count, ..GpuMesh::default() }
        };
        let first = MeshUpload { mesh: 0, runtime: runtime(3) };
        flush(&mut scene, &backend, &[first, MeshUpload { mesh: 0, runtime: runtime(9) }], &[]);
        assert_eq!(scene.loaded_meshes(0), Some(1));
        assert!(scene.readiness().pop_ready().is_none());

        let rows: Vec<GpuMesh> = backend.read_records(scene.tables().meshes, 0, 2).unwrap();
        assert_eq!(rows[0], first.runtime);
        assert!(!rows[1].is_loaded());

        flush(&mut scene, &backend, &[MeshUpload { mesh: 1, runtime: runtime(3) }], &[]);
        assert_eq!(scene.loaded_meshes(0), Some(2));
        assert_eq!(scene.readiness().ready_groups(), vec![0]);
    }
}
