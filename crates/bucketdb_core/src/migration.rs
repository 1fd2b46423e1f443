//! Schema migrations.
//!
//! The store records a schema version in its metadata bucket. A [`Migrator`]
//! holds the migrations an application knows about and applies the ones above
//! the stored version, lowest first.
//!
//! Each migration runs in its own write transaction together with the version
//! bump, so a failing migration leaves both the data and the stored version as
//! they were. Migrations are forward-only; use a backup to go back.
//!
//! ## Usage
//!
//! ```no_run
//! use bucketdb_core::{Connection, Config, CoreResult, Migration, Migrator, WriteTx};
//!
//! struct RenameTeams;
//!
//! impl Migration for RenameTeams {
//!     fn version(&self) -> u64 { 2 }
//!     fn name(&self) -> &str { "rename_teams" }
//!     fn up(&self, tx: &mut WriteTx<'_>) -> CoreResult<()> {
//!         let teams: Vec<_> = tx.get_all::<serde_json::Value>("teams")?.collect::<CoreResult<_>>()?;
//!         for (key, team) in teams {
//!             tx.update_object("groups", key, &team)?;
//!         }
//!         tx.delete_bucket("teams")?;
//!         Ok(())
//!     }
//! }
//!
//! let conn = Connection::with_config(Config::new("app.db"))?;
//! conn.open()?;
//!
//! let mut migrator = Migrator::new();
//! migrator.register(Box::new(RenameTeams))?;
//! migrator.run(&conn)?;
//! # Ok::<(), bucketdb_core::CoreError>(())
//! ```

use crate::connection::{Connection, WriteTx};
use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Information about a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationInfo {
    /// Schema version the migration produces.
    pub version: u64,
    /// Human-readable name.
    pub name: String,
    /// What the migration does.
    pub description: Option<String>,
}

/// Outcome of [`Migrator::run`].
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Stored version before the run.
    pub from_version: u64,
    /// Stored version after the run.
    pub to_version: u64,
    /// Migrations applied, in order.
    pub applied: Vec<MigrationInfo>,
}

/// One schema step.
pub trait Migration: Send + Sync {
    /// Schema version after this migration. Unique per migrator.
    fn version(&self) -> u64;

    /// Name of this migration.
    fn name(&self) -> &str;

    /// Returns an optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Applies the migration inside `tx`.
    ///
    /// Returning an error rolls the whole step back.
    fn up(&self, tx: &mut WriteTx<'_>) -> CoreResult<()>;
}

fn info_of(migration: &dyn Migration) -> MigrationInfo {
    MigrationInfo {
        version: migration.version(),
        name: migration.name().to_string(),
        description: migration.description().map(String::from),
    }
}

/// Registered migrations, keyed by version.
#[derive(Default)]
pub struct Migrator {
    migrations: BTreeMap<u64, Box<dyn Migration>>,
}

impl Migrator {
    /// Creates an empty migrator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MigrationFailed`] if the version is zero or
    /// already registered.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<()> {
        let version = migration.version();
        if version == 0 {
            return Err(CoreError::migration_failed(
                version,
                "migration versions start at 1",
            ));
        }
        if let Some(existing) = self.migrations.get(&version) {
            return Err(CoreError::migration_failed(
                version,
                format!("version already registered by {}", existing.name()),
            ));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Returns registered migrations in version order.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.migrations.values().map(|m| info_of(m.as_ref())).collect()
    }

    /// Returns the migrations above `current`, in version order.
    #[must_use]
    pub fn pending(&self, current: u64) -> Vec<MigrationInfo> {
        self.migrations
            .range(current.saturating_add(1)..)
            .map(|(_, m)| info_of(m.as_ref()))
            .collect()
    }

    /// Highest registered version, if any.
    #[must_use]
    pub fn latest(&self) -> Option<u64> {
        self.migrations.keys().next_back().copied()
    }

    /// Checks that registered versions have no gaps.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MigrationFailed`] naming the first missing
    /// version.
    pub fn validate(&self) -> CoreResult<()> {
        let mut versions = self.migrations.keys().copied();
        let Some(mut previous) = versions.next() else {
            return Ok(());
        };
        for version in versions {
            if version != previous + 1 {
                return Err(CoreError::migration_failed(
                    previous + 1,
                    format!("no migration between {previous} and {version}"),
                ));
            }
            previous = version;
        }
        Ok(())
    }

    /// Applies every migration above the stored schema version.
    ///
    /// Stops at the first failure. Steps applied before it stay committed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MigrationFailed`] with the failing version; the
    /// store keeps the version of the last successful step.
    pub fn run(&self, conn: &Connection) -> CoreResult<MigrationReport> {
        let from_version = conn.schema_version()?;
        let mut applied = Vec::new();

        for (&version, migration) in self.migrations.range(from_version.saturating_add(1)..) {
            let ran = conn
                .update_tx(|tx| {
                    // Another handle may have migrated since the version was read.
                    if tx.schema_version()?.unwrap_or(0) >= version {
                        return Ok(false);
                    }
                    migration.up(tx)?;
                    tx.set_schema_version(version)?;
                    Ok(true)
                })
                .map_err(|e| match e {
                    CoreError::MigrationFailed { .. } => e,
                    other => {
                        CoreError::migration_failed(version, format!("{}: {other}", migration.name()))
                    }
                })?;

            if ran {
                info!(version, name = migration.name(), "applied migration");
                applied.push(info_of(migration.as_ref()));
            }
        }

        let to_version = conn.schema_version()?;
        if !applied.is_empty() {
            info!(from_version, to_version, count = applied.len(), "schema migrated");
        }
        Ok(MigrationReport {
            from_version,
            to_version,
            applied,
        })
    }
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("versions", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}
