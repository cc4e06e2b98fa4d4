//! Entity forest with dirty tracking

use glam::Affine3A;

use super::entity::{Entity, EntityArena, EntityId};

/// Owns all entities and remembers which ones need their GPU state refreshed.
///
/// Newly created entities are *dirty*; entities whose transform changed after
/// creation are *modified*. Both are flushed by the next manifest sync.
#[derive(Debug)]
pub struct EntityStore {
    arena: EntityArena,
    dirty: Vec<EntityId>,
    modified: Vec<EntityId>,
    /// Per slot: already in `dirty` or `modified`
    queued: Vec<bool>,
}

impl EntityStore {
    pub fn new(capacity: u32) -> Self {
        Self {
            arena: EntityArena::new(capacity),
            dirty: Vec::new(),
            modified: Vec::new(),
            queued: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.arena.remaining()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.arena.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.arena.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.arena.iter()
    }

    /// Create an entity and mark it dirty.
    pub fn create(&mut self, entity: Entity) -> Option<EntityId> {
        let id = self.arena.insert(entity)?;
        self.queued.push(true);
        self.dirty.push(id);
        Some(id)
    }

    /// Make `children` the trailing children of `parent`, in order.
    pub(crate) fn attach_children(&mut self, parent: EntityId, children: &[EntityId]) {
        let Some((&first, _)) = children.split_first() else {
            return;
        };

        for (i, &child) in children.iter().enumerate() {
            if let Some(entity) = self.arena.get_mut(child) {
                entity.parent = Some(parent);
                entity.next_sibling = children.get(i + 1).copied();
            }
        }

        let last_existing = self.children(parent).last();
        match last_existing {
            Some(last) => {
                if let Some(entity) = self.arena.get_mut(last) {
                    entity.next_sibling = Some(first);
                }
            }
            None => {
                if let Some(entity) = self.arena.get_mut(parent) {
                    entity.first_child = Some(first);
                }
            }
        }
    }

    /// Direct children of `id` in sibling order.
    pub fn children(&self, id: EntityId) -> Children<'_> {
        Children {
            store: self,
            next: self.arena.get(id).and_then(|e| e.first_child),
        }
    }

    /// Product of local transforms from the root down to `id`.
    pub fn world_transform(&self, id: EntityId) -> Affine3A {
        let Some(entity) = self.arena.get(id) else {
            return Affine3A::IDENTITY;
        };
        let mut world = entity.local;
        let mut parent = entity.parent;
        while let Some(p) = parent {
            match self.arena.get(p) {
                Some(parent_entity) => {
                    world = parent_entity.local * world;
                    parent = parent_entity.parent;
                }
                None => break,
            }
        }
        world
    }

    /// Replace the local transform of `id` and mark it and its whole subtree modified.
    pub fn set_local_transform(&mut self, id: EntityId, local: Affine3A) -> bool {
        match self.arena.get_mut(id) {
            Some(entity) => entity.local = local,
            None => return false,
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            self.mark_modified(current);
            stack.extend(self.children(current));
        }
        true
    }

    fn mark_modified(&mut self, id: EntityId) {
        let slot = id.index() as usize;
        if slot < self.queued.len() && !self.queued[slot] {
            self.queued[slot] = true;
            self.modified.push(id);
        }
    }

    /// Number of entities waiting for a flush.
    pub fn pending_len(&self) -> usize {
        self.dirty.len() + self.modified.len()
    }

    /// Drain dirty and modified entities (each at most once, dirty first).
    pub fn take_pending(&mut self) -> Vec<EntityId> {
        let mut pending = std::mem::take(&mut self.dirty);
        pending.append(&mut self.modified);
        for id in &pending {
            self.queued[id.index() as usize] = false;
        }
        pending
    }
}

/// Iterator over a sibling chain.
pub struct Children<'a> {
    store: &'a EntityStore,
    next: Option<EntityId>,
}

impl Iterator for Children<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        let current = self.next?;
        self.next = self.store.arena.get(current).and_then(|e| e.next_sibling);
        Some(current)
    }
}
