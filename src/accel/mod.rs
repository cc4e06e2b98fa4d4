//! Ray tracing acceleration structure scheduling

pub mod scratch;
pub mod scheduler;

pub use scratch::ScratchAllocator;
pub use scheduler::{
    AccelerationScheduler, BuildInputs, FrameBuildStats, AS_SIZE_ALIGNMENT, INSTANCE_MASK,
    INSTANCE_SBT_OFFSET, MIN_INSTANCE_BUFFER_SIZE,
};
