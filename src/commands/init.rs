use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the data directory and everything in it:
/// - an initial `config.json` with default settings
/// - the `.backups` directory
/// - an empty SQLite ledger
///
/// # Arguments
/// - `settle_home` - The directory that will be the root of data directory, e.g. `$HOME/settle`
///
/// # Errors
/// - Returns an error if any file operations fail or if a ledger already exists there.
pub async fn init(settle_home: &Path) -> Result<Out<()>> {
    let config = Config::create(settle_home)
        .await
        .context("Unable to create the data directory and configs")
        .pub_result(ErrorType::Config)?;
    Ok(format!(
        "Successfully created the settle directory at {}",
        config.root().display()
    )
    .into())
}
