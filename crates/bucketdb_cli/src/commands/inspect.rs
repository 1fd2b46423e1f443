//! Inspect command implementation.

use super::connect_read_only;
use bucketdb_core::{BucketStats, Connection, ErrorKind};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Backend name.
    pub backend: String,
    /// Recorded schema version; `None` if it is sealed and no key was given.
    pub schema_version: Option<u64>,
    /// Whether records are sealed with a cipher.
    pub encrypted: bool,
    /// File size in bytes.
    pub file_size: u64,
    /// Sequence number of the last commit.
    pub committed: u64,
    /// Per-bucket figures, internal buckets included.
    pub buckets: Vec<BucketStats>,
}

/// Runs the inspect command.
pub fn run(path: &Path, key: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let conn = connect_read_only(path, key)?;

    let stats = conn.stats()?;
    let result = InspectResult {
        path: path.display().to_string(),
        backend: conn.backend_kind().to_string(),
        schema_version: schema_version(&conn)?,
        encrypted: conn.is_encrypted_store()?,
        file_size: stats.file_size,
        committed: stats.committed,
        buckets: stats.buckets,
    };
    conn.close()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

fn schema_version(conn: &Connection) -> Result<Option<u64>, bucketdb_core::CoreError> {
    match conn.schema_version() {
        Ok(version) => Ok(Some(version)),
        Err(e) if e.kind() == ErrorKind::CorruptRecord => Ok(None),
        Err(e) => Err(e),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Store Information");
    println!("=================");
    println!("  Path:           {}", result.path);
    println!("  Backend:        {}", result.backend);
    match result.schema_version {
        Some(version) => println!("  Schema version: {}", version),
        None => println!("  Schema version: unknown (key required)"),
    }
    println!("  Encrypted:      {}", if result.encrypted { "yes" } else { "no" });
    println!("  File size:      {} bytes", result.file_size);
    println!("  Committed:      {}", result.committed);
    println!();

    if result.buckets.is_empty() {
        println!("No buckets");
        return;
    }

    let width = result
        .buckets
        .iter()
        .map(|b| b.name.len())
        .max()
        .unwrap_or(0)
        .max("Bucket".len());
    println!("{:<width$}  {:>10}  {:>10}", "Bucket", "Records", "Sequence");
    for bucket in &result.buckets {
        println!(
            "{:<width$}  {:>10}  {:>10}",
            bucket.name, bucket.records, bucket.sequence
        );
    }
}
