//! CLI command implementations.

pub mod backup;
pub mod compact;
pub mod encrypt;
pub mod export;
pub mod inspect;
pub mod verify;

use bucketdb_core::{Config, Connection};
use std::path::Path;

/// Opens the store at `path`. Only `restore` may create it.
pub(crate) fn connect(
    path: &Path,
    key: Option<&str>,
    create: bool,
) -> Result<Connection, Box<dyn std::error::Error>> {
    open(config(path, key).create_if_missing(create))
}

/// Opens the store at `path` without writing to it.
pub(crate) fn connect_read_only(
    path: &Path,
    key: Option<&str>,
) -> Result<Connection, Box<dyn std::error::Error>> {
    open(config(path, key).read_only(true))
}

fn config(path: &Path, key: Option<&str>) -> Config {
    let config = Config::new(path).create_if_missing(false);
    match key {
        Some(key) => config.encryption_key(key.as_bytes()),
        None => config,
    }
}

fn open(config: Config) -> Result<Connection, Box<dyn std::error::Error>> {
    let conn = Connection::with_config(config)?;
    conn.open()?;
    Ok(conn)
}
