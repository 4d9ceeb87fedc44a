//! Upload: pending changes to the server and back.

pub mod consolidator;
pub mod generator;
pub mod ordering;
pub mod pipeline;

pub use consolidator::{Consolidated, Consolidator};
pub use generator::{
    build, collect_pending, generate, plan, refresh, PendingSet, PendingUpload, UploadBatch,
};
pub use ordering::order_by_references;
pub use pipeline::UploadPipeline;
