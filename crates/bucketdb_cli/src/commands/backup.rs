//! Backup and restore commands.
//!
//! Both go through an opened connection, so they hold the store lock and
//! never copy a half-written commit.

use super::{connect, connect_read_only};
use std::path::Path;
use tracing::info;

/// Copies the store at `db_path` to `output_path`.
pub fn create(
    db_path: &Path,
    key: Option<&str>,
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Creating backup of {:?}", db_path);

    let conn = connect_read_only(db_path, key)?;
    let bytes = conn.backup_to(output_path)?;
    let stats = conn.stats()?;
    conn.close()?;

    println!("✓ Backup created successfully");
    println!("  Path: {:?}", output_path);
    println!("  Size: {} bytes", bytes);
    println!("  Sequence: {}", stats.committed);

    Ok(())
}

/// Replaces the store at `db_path` with the backup at `input_path`.
///
/// The store is created if it does not exist yet.
pub fn restore(
    db_path: &Path,
    key: Option<&str>,
    input_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Restoring store from {:?}", input_path);

    let conn = connect(db_path, key, true)?;
    let stats = conn.restore_from(input_path)?;
    conn.close()?;

    let records: usize = stats.buckets.iter().map(|b| b.records).sum();
    println!("✓ Store restored successfully");
    println!("  Path: {:?}", db_path);
    println!("  Buckets: {}", stats.buckets.len());
    println!("  Records: {}", records);
    println!("  Sequence: {}", stats.committed);

    Ok(())
}
