//! Rtscene - Scene manifest streaming and ray-tracing acceleration structure builds

pub mod core;
pub mod math;
pub mod gpu;
pub mod asset;
pub mod manifest;
pub mod scene;
pub mod streaming;
pub mod accel;
pub mod frame;
