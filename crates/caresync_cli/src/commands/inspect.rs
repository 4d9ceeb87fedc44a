//! Inspect command implementation.

use super::open_store;
use caresync_core::StoreStats;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Store summary for output.
#[derive(Debug, Serialize)]
pub struct StoreInfo {
    /// Journal file path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Store statistics.
    #[serde(flatten)]
    pub stats: StoreStats,
}

/// Runs the inspect command.
pub fn run(path: &Path, types: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let info = collect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        _ => print_text_output(&info, types),
    }

    Ok(())
}

/// Opens the store and gathers its summary.
pub fn collect(path: &Path) -> Result<StoreInfo, Box<dyn std::error::Error>> {
    info!("Inspecting store at {:?}", path);
    let store = open_store(path)?;
    Ok(StoreInfo {
        path: path.display().to_string(),
        journal_bytes: store.journal_size()?,
        stats: store.stats(),
    })
}

fn print_text_output(info: &StoreInfo, types: bool) {
    let stats = &info.stats;
    println!("Store: {}", info.path);
    println!("  Journal size:     {} bytes", info.journal_bytes);
    println!("  Last sequence:    {}", stats.seq);
    println!("  Live records:     {}", stats.records);
    println!("  Tombstones:       {}", stats.tombstones);
    println!("  Pending records:  {}", stats.pending_records);
    println!("  Pending changes:  {}", stats.pending_changes);
    println!("  References:       {}", stats.references);

    if types {
        println!();
        println!("{:<24} {:>8} {:>10} {:>8}", "Type", "Records", "Tombstones", "Pending");
        for (record_type, counts) in &stats.by_type {
            println!(
                "{:<24} {:>8} {:>10} {:>8}",
                record_type, counts.records, counts.tombstones, counts.pending_records
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::sample_journal;

    #[test]
    fn collects_counts_per_type() {
        let (_dir, path) = sample_journal();
        let info = collect(&path).unwrap();
        assert_eq!(info.stats.records, 2);
        assert_eq!(info.stats.tombstones, 1);
        assert_eq!(info.stats.by_type["Patient"].pending_records, 2);
        assert_eq!(info.stats.references, 1);
        assert!(info.journal_bytes > 0);
    }

    #[test]
    fn missing_journal_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(collect(&dir.path().join("absent.journal")).is_err());
    }
}
