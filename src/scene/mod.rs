//! Scene state: entity hierarchy, asset ingest and per-frame GPU manifest sync

pub mod entity;
pub mod hierarchy;
pub mod ingest;
pub mod manager;
pub mod sync;

pub use entity::{Entity, EntityArena, EntityId, EntityKind};
pub use hierarchy::{Children, EntityStore};
pub use ingest::IngestOutcome;
pub use manager::{GpuTables, Scene};
