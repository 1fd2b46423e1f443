//! Encrypt command implementation.

use super::connect;
use std::path::Path;

/// Seals every record of a plaintext store with `key`.
pub fn run(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let conn = connect(path, Some(key), false)?;

    if !conn.needs_encryption_migration()? {
        conn.close()?;
        println!("Store is already encrypted");
        return Ok(());
    }

    let sealed = conn.encrypt_store()?;
    conn.close()?;

    println!("✓ Store encrypted");
    println!("  Records sealed: {}", sealed);

    Ok(())
}
