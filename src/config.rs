//! Configuration file handling.
//!
//! The configuration file is stored at `$SETTLE_HOME/config.json` and holds the backup settings
//! and the group that commands use when none is given.

use crate::backup::Backup;
use crate::db::Db;
use crate::{utils, Result};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_NAME: &str = "settle";
const CONFIG_VERSION: u8 = 1;
const BACKUP_COPIES: u32 = 5;
const BACKUPS: &str = ".backups";
const CONFIG_JSON: &str = "config.json";
const SETTLE_SQLITE: &str = "settle.sqlite";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$SETTLE_HOME` and from there it loads `$SETTLE_HOME/config.json`. It provides
/// paths to the other items that live in the settle home directory and owns the database handle.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    backups: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    db: Db,
    sqlite_path: PathBuf,
}

impl Config {
    /// Creates the data directory, its backups subdirectory, an initial `config.json` with default
    /// settings and an empty SQLite ledger.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail or if a ledger already exists in `dir`.
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the settle home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;
        if root.join(SETTLE_SQLITE).exists() {
            bail!("A ledger already exists in '{}'", root.display())
        }

        let backups_dir = root.join(BACKUPS);
        utils::make_dir(&backups_dir).await?;

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile::default();
        config_file.save(&config_path).await?;

        let db_path = root.join(SETTLE_SQLITE);
        let db = Db::init(&db_path)
            .await
            .context("Unable to create SQLite DB")?;

        Ok(Self {
            root,
            backups: backups_dir,
            config_path,
            config_file,
            db,
            sqlite_path: db_path,
        })
    }

    /// This will
    /// - validate that `settle_home` and its config file exist
    /// - load the config file
    /// - open the SQLite ledger, migrating it if its schema is out of date
    /// - validate that the backups directory exists
    pub async fn load(settle_home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = settle_home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("Settle Home is missing, run `settle init` first")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;

        let db_path = root.join(SETTLE_SQLITE);
        let db = Db::load(&db_path)
            .await
            .context("Unable to load SQLite DB")?;

        let config = Self {
            root: root.clone(),
            backups: root.join(BACKUPS),
            config_path,
            config_file,
            db,
            sqlite_path: db_path,
        };
        if !config.backups.is_dir() {
            bail!(
                "The backups directory is missing '{}'",
                config.backups.display()
            )
        }
        Ok(config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    pub fn backups(&self) -> &Path {
        &self.backups
    }

    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    pub fn backup_copies(&self) -> u32 {
        self.config_file.backup_copies
    }

    pub fn default_group(&self) -> Option<&str> {
        self.config_file.default_group.as_deref()
    }

    /// Returns `group` if given, otherwise the configured default group.
    pub fn group<'a>(&'a self, group: Option<&'a str>) -> Result<&'a str> {
        group.or(self.default_group()).context(
            "No group was given and no default group is configured. Pass --group or create a \
            group with --default",
        )
    }

    /// Makes `group` the default group and saves `config.json`.
    pub async fn set_default_group(&mut self, group: &str) -> Result<()> {
        self.config_file.default_group = Some(group.to_string());
        self.config_file.save(&self.config_path).await
    }

    /// Creates a new `Backup` instance for managing backup files.
    pub fn backup(&self) -> Backup {
        Backup::new(self)
    }
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "settle",
///   "config_version": 1,
///   "backup_copies": 5,
///   "default_group": "lisbon"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "settle"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    /// Number of backup copies to keep
    #[serde(default = "default_backup_copies")]
    backup_copies: u32,

    /// The group used when a command is not given one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_group: Option<String>,
}

fn default_backup_copies() -> u32 {
    BACKUP_COPIES
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            backup_copies: BACKUP_COPIES,
            default_group: None,
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile from `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if it belongs to another app.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path)
            .await
            .with_context(|| format!("Failed to load config file at {}", path.display()))?;

        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        anyhow::ensure!(
            config.config_version <= CONFIG_VERSION,
            "The config file version {} is newer than this program supports ({})",
            config.config_version,
            CONFIG_VERSION
        );

        Ok(config)
    }

    /// Saves the ConfigFile to `path`.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }
}
