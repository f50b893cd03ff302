//! Database schema migrations.
//!
//! Each migration is a pair of SQL files in this directory:
//! - `migration_NN_up.sql` takes the schema from version `NN-1` to `NN`
//! - `migration_NN_down.sql` takes it from `NN` back to `NN-1`
//!
//! The version lives in the single-row `schema_version` table.

use anyhow::{bail, Context};
use sqlx::{Executor, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::Result;

/// The schema version this build expects.
pub(crate) const CURRENT_VERSION: i32 = 1;

struct Migration {
    /// The version the up script produces.
    version: i32,
    up_sql: &'static str,
    down_sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    up_sql: include_str!("migration_01_up.sql"),
    down_sql: include_str!("migration_01_down.sql"),
}];

fn find(version: i32) -> Result<&'static Migration> {
    MIGRATIONS
        .iter()
        .find(|m| m.version == version)
        .with_context(|| format!("Migration {version} not found"))
}

/// Creates the `schema_version` table of a brand new database at version 0.
pub(crate) async fn bootstrap(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        "CREATE TABLE schema_version (version INTEGER NOT NULL);
         INSERT INTO schema_version (version) VALUES (0);",
    )
    .await
    .context("Failed to create the schema_version table")?;
    Ok(())
}

/// Reads the schema version of an existing database.
pub(crate) async fn version(pool: &SqlitePool) -> Result<i32> {
    let row: (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .context("Failed to read the schema version")?;
    row.0.context("The schema_version table is empty")
}

/// Moves the schema from `current_ver` to `target_ver`, one migration at a time.
///
/// Every migration needed is checked for before any of them runs. Each one runs in its own
/// transaction together with the `schema_version` update.
pub(crate) async fn run(pool: &SqlitePool, current_ver: i32, target_ver: i32) -> Result<()> {
    if current_ver == target_ver {
        debug!("Database already at version {target_ver}");
        return Ok(());
    }
    validate_migrations(current_ver, target_ver)?;

    if current_ver < target_ver {
        for version in (current_ver + 1)..=target_ver {
            debug!("Running migration {version:02} (up)");
            run_single_migration(pool, find(version)?.up_sql, version).await?;
        }
    } else {
        for version in (target_ver + 1..=current_ver).rev() {
            debug!("Running migration {version:02} (down)");
            run_single_migration(pool, find(version)?.down_sql, version - 1).await?;
        }
    }

    debug!("Schema now at version {target_ver}");
    Ok(())
}

async fn run_single_migration(pool: &SqlitePool, sql: &str, new_version: i32) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin migration transaction")?;

    tx.execute(sql)
        .await
        .context("Failed to execute migration SQL")?;
    set_version(&mut tx, new_version).await?;

    tx.commit()
        .await
        .context("Failed to commit migration transaction")
}

async fn set_version(conn: &mut SqliteConnection, version: i32) -> Result<()> {
    sqlx::query("UPDATE schema_version SET version = ?")
        .bind(version)
        .execute(&mut *conn)
        .await
        .context("Failed to update schema_version")?;
    Ok(())
}

fn validate_migrations(current_version: i32, target_version: i32) -> Result<()> {
    let (start, end) = if current_version < target_version {
        (current_version + 1, target_version)
    } else {
        (target_version + 1, current_version)
    };

    for version in start..=end {
        if !MIGRATIONS.iter().any(|m| m.version == version) {
            bail!(
                "Migration {version} is missing but required to migrate from version \
                {current_version} to {target_version}"
            );
        }
    }
    Ok(())
}
