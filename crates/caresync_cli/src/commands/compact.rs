//! Compact command implementation.

use super::open_store;
use std::path::Path;
use tracing::info;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Frames before compaction.
    pub frames_before: usize,
    /// Frames after compaction.
    pub frames_after: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting journal at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(path, dry_run)?;

    println!("Compaction Analysis:");
    println!("  Frames before: {}", stats.frames_before);
    println!("  Frames after:  {}", stats.frames_after);
    println!("  Size before:   {} bytes", stats.bytes_before);
    println!("  Size after:    {} bytes", stats.bytes_after);

    if !dry_run {
        println!();
        println!("✓ Compaction complete");
    }

    Ok(())
}

/// Compacts the journal, or only measures it when `dry_run` is set.
pub fn compact(path: &Path, dry_run: bool) -> Result<CompactStats, Box<dyn std::error::Error>> {
    info!("Compacting journal {:?} (dry run: {})", path, dry_run);
    let store = open_store(path)?;
    let frames_before = store.journal_frames()?.len();
    let bytes_before = store.journal_size()?;

    if dry_run || frames_before <= 1 {
        return Ok(CompactStats {
            frames_before,
            frames_after: frames_before,
            bytes_before,
            bytes_after: bytes_before,
        });
    }

    store.compact()?;
    Ok(CompactStats {
        frames_before,
        frames_after: store.journal_frames()?.len(),
        bytes_before,
        bytes_after: store.journal_size()?,
    })
}
