//! Background asset loading: worker pool, load jobs, upload collection and
//! mesh group readiness

pub mod pool;
pub mod readiness;
pub mod uploads;
pub mod jobs;
pub mod dispatcher;

pub use pool::{ImmediateDispatcher, Job, JobDispatcher, JobPriority, WorkerPool};
pub use readiness::MeshGroupReadiness;
pub use uploads::{
    ImageUpload, JobTicket, MeshUpload, MipRegion, PendingMeshUpload, PendingTextureUpload,
    TextureUpload, UploadBatch, UploadQueue,
};
pub use jobs::{JobContext, JobOutcome, MeshLayout, MeshLoadJob, TextureLoadJob, pack_mesh};
pub use dispatcher::{DispatchSummary, LoadDispatcher};
