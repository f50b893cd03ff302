//! Copies of the SQLite ledger taken before operations that rewrite existing rows.

use crate::{utils, Config, Result};
use anyhow::Context;
use chrono::Local;
use std::path::PathBuf;
use tracing::debug;

/// Prefix for SQLite backup files.
pub const SQLITE: &str = "settle.sqlite";

/// Manages backup file creation and rotation.
///
/// Create a new instance via `Config::backup()` or `Backup::new()`.
#[derive(Debug, Clone)]
pub struct Backup {
    backups_dir: PathBuf,
    backup_copies: u32,
    sqlite_path: PathBuf,
}

impl Backup {
    pub fn new(config: &Config) -> Self {
        Self {
            backups_dir: config.backups().to_path_buf(),
            backup_copies: config.backup_copies(),
            sqlite_path: config.sqlite_path().to_path_buf(),
        }
    }

    /// Copies the SQLite database file to the backups directory.
    ///
    /// The filename format is `settle.sqlite.YYYY-MM-DD-NNN`. Old backups are rotated so that only
    /// `backup_copies` files remain.
    ///
    /// Returns the path to the created backup file.
    pub async fn copy_sqlite(&self) -> Result<PathBuf> {
        let date = today();
        let seq = self.next_sequence_number(&date).await?;
        let path = self.backups_dir.join(format!("{SQLITE}.{date}-{seq:03}"));

        utils::copy(&self.sqlite_path, &path).await?;
        debug!("Backed up the ledger to {}", path.display());

        self.rotate().await?;
        Ok(path)
    }

    async fn backup_files(&self) -> Result<Vec<(PathBuf, String)>> {
        let mut files = Vec::new();
        let mut dir = utils::read_dir(&self.backups_dir).await?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_backup_file(&name) {
                files.push((entry.path(), name));
            }
        }
        Ok(files)
    }

    async fn next_sequence_number(&self, date: &str) -> Result<u32> {
        let max_seq = self
            .backup_files()
            .await?
            .iter()
            .filter_map(|(_, name)| parse_sequence_number(name, date))
            .max()
            .unwrap_or(0);
        Ok(max_seq + 1)
    }

    /// Deletes the oldest backups beyond `backup_copies`.
    async fn rotate(&self) -> Result<()> {
        let mut files = self.backup_files().await?;
        // The name format sorts by date, then sequence number
        files.sort_by(|a, b| a.1.cmp(&b.1));

        let to_delete = files.len().saturating_sub(self.backup_copies as usize);
        for (path, _) in files.into_iter().take(to_delete) {
            utils::remove(&path).await?;
        }
        Ok(())
    }
}

/// Returns today's date in YYYY-MM-DD format.
fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Parses the sequence number from `settle.sqlite.{date}-NNN`.
fn parse_sequence_number(filename: &str, date: &str) -> Option<u32> {
    filename
        .strip_prefix(&format!("{SQLITE}.{date}-"))?
        .parse()
        .ok()
}

fn is_backup_file(filename: &str) -> bool {
    filename
        .strip_prefix(&format!("{SQLITE}."))
        .is_some_and(|rest| !rest.is_empty() && !rest.ends_with("-journal"))
}
