//! Mathematical utilities for GPU-facing transforms and memory layout

pub mod align;
pub mod transform;

pub use align::align_up;
pub use transform::{GpuTransform, InstanceTransform};
