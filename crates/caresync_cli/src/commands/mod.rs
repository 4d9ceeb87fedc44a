//! CLI command implementations.

pub mod compact;
pub mod dump_journal;
pub mod inspect;
pub mod pending;

use caresync_core::{NamedReferenceMembers, RecordStore, StoreConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Opens the store behind a journal file without compacting it.
pub fn open_store(path: &Path) -> Result<RecordStore, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Journal file not found: {}", path.display()).into());
    }
    debug!("Opening journal {:?}", path);
    let config = StoreConfig::default().compact_after_frames(0);
    Ok(RecordStore::open_file(path, config, Arc::new(NamedReferenceMembers))?)
}
