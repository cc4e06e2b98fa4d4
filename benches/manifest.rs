use criterion::{criterion_group, criterion_main, BatchSize, Criterion, black_box};

use std::path::Path;
use std::sync::Arc;

use glam::{Affine3A, Quat, Vec3};

use rtscene::asset::{MemoryAsset, MeshData};
use rtscene::core::SceneConfig;
use rtscene::gpu::{GpuBackend, HeadlessBackend};
use rtscene::scene::Scene;
use rtscene::streaming::pack_mesh;

fn bench_config() -> SceneConfig {
    SceneConfig {
        max_entities: 8192,
        max_mesh_groups: 1024,
        max_meshes: 4096,
        max_materials: 256,
        max_textures: 256,
        scratch_buffer_size: 1 << 20,
    }
}

/// `fanout` top-level nodes, each with `fanout` children sharing one mesh group.
fn wide_asset(fanout: u32) -> Arc<MemoryAsset> {
    let mut b = MemoryAsset::builder();
    let group = b.mesh_group("quad", vec![(MeshData::quad(), None)]);
    for i in 0..fanout {
        let parent = b.node(&format!("p{}", i), Affine3A::from_translation(Vec3::new(i as f32, 0.0, 0.0)), None);
        for j in 0..fanout {
            let child = b.node(
                &format!("c{}_{}", i, j),
                Affine3A::from_rotation_translation(Quat::from_rotation_y(j as f32 * 0.1), Vec3::Y),
                Some(group),
            );
            b.child(parent, child);
        }
    }
    Arc::new(b.build("wide.mem"))
}

fn bench_ingest(c: &mut Criterion) {
    let asset = wide_asset(32);

    c.bench_function("ingest_1056_nodes", |b| {
        b.iter_batched(
            || Scene::new(bench_config(), Arc::new(HeadlessBackend::default())).unwrap(),
            |mut scene| {
                scene.ingest(asset.clone(), Path::new("wide.mem")).unwrap();
                scene
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_transform_flush(c: &mut Criterion) {
    let backend = Arc::new(HeadlessBackend::default());
    let mut scene = Scene::new(bench_config(), backend.clone()).unwrap();
    let root = scene.ingest(wide_asset(32), Path::new("wide.mem")).unwrap().root;
    let batch = scene.record_gpu_manifest_update(&[], &[]).unwrap();
    backend.submit(vec![batch]).unwrap();

    c.bench_function("flush_moved_root_1057_entities", |b| {
        let mut frame = 0u32;
        b.iter(|| {
            frame += 1;
            scene.set_local_transform(root, Affine3A::from_translation(Vec3::new(0.0, frame as f32 * 0.01, 0.0)));
            let batch = scene.record_gpu_manifest_update(&[], &[]).unwrap();
            backend.submit(vec![black_box(batch)]).unwrap();
            backend.collect_garbage();
        });
    });
}

fn bench_pack_mesh(c: &mut Criterion) {
    let n = 64u32;
    let mut mesh = MeshData::default();
    for y in 0..n {
        for x in 0..n {
            mesh.positions.push([x as f32, y as f32, 0.0]);
            mesh.normals.push([0.0, 0.0, 1.0]);
            mesh.uvs.push([x as f32 / n as f32, y as f32 / n as f32]);
        }
    }
    let mut indices = Vec::new();
    for y in 0..n - 1 {
        for x in 0..n - 1 {
            let i = y * n + x;
            indices.extend_from_slice(&[i, i + 1, i + n, i + 1, i + n + 1, i + n]);
        }
    }
    mesh.indices = Some(indices);

    c.bench_function("pack_mesh_64x64_grid", |b| {
        b.iter(|| pack_mesh(black_box(&mesh)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_ingest,
    bench_transform_flush,
    bench_pack_mesh,
);

criterion_main!(benches);
