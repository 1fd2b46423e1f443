//! Export command implementation.

use super::connect_read_only;
use std::path::Path;

/// Writes every user bucket of the store to `output` as JSON.
pub fn run(path: &Path, key: Option<&str>, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let conn = connect_read_only(path, key)?;
    let buckets = conn.bucket_names()?.len();
    let records = conn.export_json(output)?;
    conn.close()?;

    println!("✓ Export complete");
    println!("  Path: {:?}", output);
    println!("  Buckets: {}", buckets);
    println!("  Records: {}", records);

    Ok(())
}
