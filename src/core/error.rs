//! Error types for the scene pipeline

use std::path::PathBuf;

use thiserror::Error;

use crate::manifest::TextureKind;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Load error: {0}")]
    Load(#[from] LoadManifestError),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// A single build needs more scratch memory than the whole scratch buffer holds.
    #[error("scratch budget exceeded: {what} needs {required} bytes, scratch buffer holds {capacity}")]
    ScratchBudget {
        what: String,
        required: u64,
        capacity: u64,
    },
}

/// Failures reported by a [`GpuBackend`](crate::gpu::GpuBackend).
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("out of device memory allocating '{name}' ({size} bytes)")]
    OutOfMemory { name: String, size: u64 },

    #[error("invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u32 },

    #[error("access of {len} bytes at offset {offset} overruns buffer {id} ({size} bytes)")]
    OutOfBounds { id: u32, offset: u64, len: u64, size: u64 },

    #[error("buffer {0} is not host visible")]
    NotHostVisible(u32),

    #[error("device address {0:#x} does not belong to a live resource")]
    InvalidAddress(u64),
}

/// Errors returned from scene ingest. A failed ingest leaves the scene untouched.
#[derive(Debug, Error)]
pub enum LoadManifestError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("unsupported file type: {}", .0.display())]
    UnsupportedFileType(PathBuf),

    #[error("failed to parse {}: {reason}", path.display())]
    ParseFailed { path: PathBuf, reason: String },

    #[error("texture {texture} is referenced as {requested:?} but already classified as {existing:?}")]
    TextureClassificationConflict {
        texture: u32,
        existing: TextureKind,
        requested: TextureKind,
    },

    #[error("{what} index {index} out of range ({len} available)")]
    InvalidReference {
        what: &'static str,
        index: u32,
        len: u32,
    },

    #[error("invalid node hierarchy at node {node}: {reason}")]
    InvalidHierarchy { node: u32, reason: &'static str },

    #[error("{table} manifest full: {requested} entries requested, {remaining} remaining")]
    CapacityExceeded {
        table: &'static str,
        requested: usize,
        remaining: usize,
    },
}

/// Errors from a single background load job. Logged, never propagated to the frame loop.
#[derive(Debug, Error)]
pub enum AssetLoadError {
    #[error("primitive {primitive} of mesh {mesh} not present in source asset")]
    MissingMesh { mesh: u32, primitive: u32 },

    #[error("image {0} not present in source asset")]
    MissingImage(u32),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}
