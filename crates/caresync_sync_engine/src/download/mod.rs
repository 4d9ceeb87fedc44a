//! Download: remote pages into the local store.

pub mod pipeline;
pub mod resolver;
pub mod state;

pub use pipeline::{load_state, DownloadPipeline};
pub use resolver::{
    AcceptLocalResolver, AcceptRemoteResolver, ConflictResolver, FnResolver,
    LastUpdatedWinsResolver, Resolution,
};
pub use state::{cursor_key, DownloadCursor, DownloadState};
