//! Turning a parsed asset into manifest rows and entities.
//!
//! Ingest runs in two phases. Validation checks every reference, the node
//! hierarchy, texture classification and table capacity without touching the
//! scene. Only then are rows appended, so a failed ingest leaves every table
//! exactly as it was.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use crate::asset::{AlphaMode, AssetDescription, NodeDesc, SourceAsset};
use crate::core::error::LoadManifestError;
use crate::manifest::{
    AssetRecord, Manifest, MaterialEntry, MeshEntry, MeshGroupEntry, TextureEntry, TextureKind,
};
use crate::streaming::MeshGroupReadiness;

use super::entity::{Entity, EntityId, EntityKind};
use super::hierarchy::EntityStore;

/// What one ingest added.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Index of the new asset record
    pub asset: u32,
    pub root: EntityId,
    /// Global indices of the new textures
    pub textures: Range<u32>,
    /// Global indices of the new meshes
    pub meshes: Range<u32>,
}

/// Tables and entities an ingest writes into.
pub(crate) struct IngestTarget<'a> {
    pub manifest: &'a mut Manifest,
    pub entities: &'a mut EntityStore,
    pub readiness: &'a MeshGroupReadiness,
}

pub(crate) fn ingest_asset(
    target: IngestTarget<'_>,
    source: Arc<dyn SourceAsset>,
    path: &Path,
) -> Result<IngestOutcome, LoadManifestError> {
    let IngestTarget { manifest, entities, readiness } = target;
    let desc = source.description();

    let texture_offset = manifest.textures.len() as u32;
    let material_offset = manifest.materials.len() as u32;
    let mesh_group_offset = manifest.mesh_groups.len() as u32;
    let mesh_offset = manifest.meshes.len() as u32;
    let asset_index = manifest.assets.len() as u32;

    // --- Validation ---

    check_capacity(desc, manifest, entities)?;
    check_references(desc)?;
    let parent_of = check_hierarchy(&desc.nodes)?;
    let kinds = classify_textures(desc, texture_offset)?;

    // --- Commit ---

    for (i, texture) in desc.textures.iter().enumerate() {
        manifest.textures.push(TextureEntry {
            name: texture.name.clone(),
            kind: kinds[i],
            asset: asset_index,
            asset_local_index: i as u32,
            asset_local_image: texture.image,
            materials: Vec::new(),
            runtime: None,
            secondary_runtime: None,
        })?;
    }

    for (i, material) in desc.materials.iter().enumerate() {
        let global = |t: Option<u32>| t.map(|t| t + texture_offset);
        let diffuse = global(material.diffuse_texture);
        let normal = global(material.normal_texture);
        let roughness_metalness = global(material.roughness_metalness_texture);

        let index = manifest.materials.push(MaterialEntry {
            name: material.name.clone(),
            diffuse,
            opacity_mask: diffuse,
            normal,
            roughness_metalness,
            asset: asset_index,
            asset_local_index: i as u32,
            alpha_discard_enabled: material.alpha_mode == AlphaMode::Mask,
            normal_compressed_bc5_rg: false,
            base_color: material.base_color,
        })?;

        let mut referenced: Vec<u32> = [diffuse, normal, roughness_metalness].into_iter().flatten().collect();
        referenced.sort_unstable();
        referenced.dedup();
        for texture in referenced {
            manifest.textures[texture].materials.push(index);
        }
    }

    for (g, group) in desc.mesh_groups.iter().enumerate() {
        let group_index = mesh_group_offset + g as u32;
        manifest.mesh_groups.push(MeshGroupEntry {
            name: group.name.clone(),
            mesh_indices_offset: manifest.mesh_indices.len() as u32,
            mesh_count: group.primitives.len() as u32,
            asset: asset_index,
            asset_local_index: g as u32,
            blas: None,
        })?;
        for (p, primitive) in group.primitives.iter().enumerate() {
            let mesh = manifest.meshes.push(MeshEntry {
                asset: asset_index,
                asset_local_mesh_group: g as u32,
                asset_local_primitive: p as u32,
                mesh_group: group_index,
                material: primitive.material.map(|m| m + material_offset),
                runtime: None,
            })?;
            manifest.mesh_indices.push(mesh)?;
        }
        readiness.register_group(group_index, group.primitives.len() as u32);
    }

    let capacity_exceeded = || LoadManifestError::CapacityExceeded {
        table: "entity",
        requested: 1,
        remaining: 0,
    };

    let mut ids = Vec::with_capacity(desc.nodes.len());
    for node in &desc.nodes {
        let mut entity = Entity::new(node.name.clone(), node_kind(node));
        entity.local = node.transform;
        entity.mesh_group = node.mesh_group.map(|g| g + mesh_group_offset);
        ids.push(entities.create(entity).ok_or_else(capacity_exceeded)?);
    }
    for (i, node) in desc.nodes.iter().enumerate() {
        let children: Vec<EntityId> = node.children.iter().map(|&c| ids[c as usize]).collect();
        entities.attach_children(ids[i], &children);
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("asset");
    let root = entities
        .create(Entity::new(format!("{}_{}", stem, asset_index), EntityKind::Root))
        .ok_or_else(capacity_exceeded)?;
    let top_level: Vec<EntityId> = parent_of
        .iter()
        .enumerate()
        .filter(|(_, parent)| parent.is_none())
        .map(|(i, _)| ids[i])
        .collect();
    entities.attach_children(root, &top_level);

    manifest.assets.push(AssetRecord {
        path: path.to_path_buf(),
        source: Arc::clone(&source),
        texture_offset,
        material_offset,
        mesh_group_offset,
        mesh_offset,
        root_entity: root,
    });

    log::info!(
        "Ingested {}: {} entities, {} mesh groups, {} meshes, {} materials, {} textures",
        path.display(),
        ids.len() + 1,
        desc.mesh_groups.len(),
        desc.mesh_count(),
        desc.materials.len(),
        desc.textures.len()
    );

    Ok(IngestOutcome {
        asset: asset_index,
        root,
        textures: texture_offset..manifest.textures.len() as u32,
        meshes: mesh_offset..manifest.meshes.len() as u32,
    })
}

fn node_kind(node: &NodeDesc) -> EntityKind {
    if node.mesh_group.is_some() {
        EntityKind::MeshGroup
    } else if node.camera.is_some() {
        EntityKind::Camera
    } else if node.light.is_some() {
        EntityKind::Light
    } else {
        EntityKind::Transform
    }
}

fn check_capacity(desc: &AssetDescription, manifest: &Manifest, entities: &EntityStore) -> Result<(), LoadManifestError> {
    let mesh_count = desc.mesh_count();
    manifest.textures.ensure_room(desc.textures.len())?;
    manifest.materials.ensure_room(desc.materials.len())?;
    manifest.mesh_groups.ensure_room(desc.mesh_groups.len())?;
    manifest.meshes.ensure_room(mesh_count)?;
    manifest.mesh_indices.ensure_room(mesh_count)?;

    // One entity per node plus the synthetic root
    let needed = desc.nodes.len() + 1;
    if needed > entities.remaining() {
        return Err(LoadManifestError::CapacityExceeded {
            table: "entity",
            requested: needed,
            remaining: entities.remaining(),
        });
    }
    Ok(())
}

fn check_index(what: &'static str, index: u32, len: usize) -> Result<(), LoadManifestError> {
    if index as usize >= len {
        return Err(LoadManifestError::InvalidReference { what, index, len: len as u32 });
    }
    Ok(())
}

fn check_references(desc: &AssetDescription) -> Result<(), LoadManifestError> {
    for texture in &desc.textures {
        check_index("image", texture.image, desc.image_count as usize)?;
    }
    for material in &desc.materials {
        let refs = [material.diffuse_texture, material.normal_texture, material.roughness_metalness_texture];
        for texture in refs.into_iter().flatten() {
            check_index("texture", texture, desc.textures.len())?;
        }
    }
    for group in &desc.mesh_groups {
        for material in group.primitives.iter().filter_map(|p| p.material) {
            check_index("material", material, desc.materials.len())?;
        }
    }
    for node in &desc.nodes {
        if let Some(group) = node.mesh_group {
            check_index("mesh group", group, desc.mesh_groups.len())?;
        }
        for &child in &node.children {
            check_index("node", child, desc.nodes.len())?;
        }
    }
    Ok(())
}

/// Parent of every node. Fails on shared children, self-parenting and cycles.
fn check_hierarchy(nodes: &[NodeDesc]) -> Result<Vec<Option<u32>>, LoadManifestError> {
    let mut parent_of: Vec<Option<u32>> = vec![None; nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for &child in &node.children {
            if child as usize == i {
                return Err(LoadManifestError::InvalidHierarchy { node: child, reason: "node is its own child" });
            }
            if parent_of[child as usize].is_some() {
                return Err(LoadManifestError::InvalidHierarchy { node: child, reason: "node has more than one parent" });
            }
            parent_of[child as usize] = Some(i as u32);
        }
    }

    // With single parents, every node is reachable from a top-level node unless it sits on a cycle
    let mut visited = vec![false; nodes.len()];
    let mut stack: Vec<u32> = (0..nodes.len() as u32).filter(|&i| parent_of[i as usize].is_none()).collect();
    while let Some(node) = stack.pop() {
        visited[node as usize] = true;
        stack.extend(nodes[node as usize].children.iter().copied());
    }
    if let Some(node) = visited.iter().position(|v| !v) {
        return Err(LoadManifestError::InvalidHierarchy { node: node as u32, reason: "node is part of a cycle" });
    }

    Ok(parent_of)
}

/// Classification of every texture of this asset. Conflicts are reported
/// with the global index the texture would have received.
fn classify_textures(desc: &AssetDescription, texture_offset: u32) -> Result<Vec<TextureKind>, LoadManifestError> {
    let mut kinds = vec![TextureKind::None; desc.textures.len()];

    let mut classify = |texture: u32, requested: TextureKind| -> Result<(), LoadManifestError> {
        let existing = kinds[texture as usize];
        if existing == TextureKind::None {
            kinds[texture as usize] = requested;
        } else if !existing.is_compatible_with(requested) {
            return Err(LoadManifestError::TextureClassificationConflict {
                texture: texture + texture_offset,
                existing,
                requested,
            });
        }
        Ok(())
    };

    for material in &desc.materials {
        if let Some(texture) = material.diffuse_texture {
            let kind = if material.alpha_mode == AlphaMode::Mask {
                TextureKind::DiffuseOpacity
            } else {
                TextureKind::Diffuse
            };
            classify(texture, kind)?;
        }
        if let Some(texture) = material.normal_texture {
            classify(texture, TextureKind::Normal)?;
        }
        if let Some(texture) = material.roughness_metalness_texture {
            classify(texture, TextureKind::RoughnessMetalness)?;
        }
    }

    Ok(kinds)
}
