//! Compact command implementation.

use super::connect;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, key: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting store at {:?}", path);
    println!();

    let conn = connect(path, key, false)?;
    let stats = conn.compact()?;
    conn.close()?;

    println!("  Size before: {} bytes", stats.before);
    println!("  Size after:  {} bytes", stats.after);
    println!(
        "  Reclaimed:   {} bytes",
        stats.before.saturating_sub(stats.after)
    );
    println!();
    println!("✓ Compaction complete");

    Ok(())
}
