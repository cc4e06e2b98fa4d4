//! Entity records and the slot arena that owns them

use glam::Affine3A;

/// Stable index of an entity slot. Also the entity's row in the GPU entity arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) u32);

impl EntityId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// Synthetic parent of one loaded asset's top-level nodes
    Root,
    Transform,
    MeshGroup,
    Camera,
    Light,
}

/// A transform node. Links are plain slot indices; the arena alone owns entities.
#[derive(Clone, Debug)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    /// Transform relative to the parent
    pub local: Affine3A,
    /// Cached product of all local transforms up to the root, refreshed on flush
    pub world: Affine3A,
    pub mesh_group: Option<u32>,
    pub parent: Option<EntityId>,
    pub first_child: Option<EntityId>,
    pub next_sibling: Option<EntityId>,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            local: Affine3A::IDENTITY,
            world: Affine3A::IDENTITY,
            mesh_group: None,
            parent: None,
            first_child: None,
            next_sibling: None,
        }
    }
}

/// Fixed-capacity slot arena. Slots are handed out in order and never reused.
#[derive(Debug)]
pub struct EntityArena {
    slots: Vec<Entity>,
    capacity: u32,
}

impl EntityArena {
    pub fn new(capacity: u32) -> Self {
        Self { slots: Vec::new(), capacity }
    }

    pub fn insert(&mut self, entity: Entity) -> Option<EntityId> {
        if self.slots.len() as u32 >= self.capacity {
            return None;
        }
        self.slots.push(entity);
        Some(EntityId(self.slots.len() as u32 - 1))
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots.get_mut(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        (self.capacity as usize).saturating_sub(self.slots.len())
    }

    /// All live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.slots.iter().enumerate().map(|(i, e)| (EntityId(i as u32), e))
    }
}
