//! Command handlers for the settle CLI.
//!
//! This module contains implementations for all CLI subcommands. The MCP tools call the same
//! handlers.

mod expense;
mod group;
mod init;
mod link;
mod mcp;
mod report;
mod settle;
mod summary;

use crate::error::{ErrorType, IntoResult};
use crate::model::{Group, MemberId, Roster};
use crate::{utils, Config, Result};
use anyhow::{bail, Context};
use serde::Serialize;
use std::fmt::Debug;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

pub use expense::{add_expense, delete_entry};
pub use group::{add_member, create_group, CreatedGroup};
pub use init::init;
pub use link::link;
pub use mcp::mcp;
pub use report::{balances, settlements, settlements_from_balances, spending, SpendingReport};
pub use settle::settle;
pub use summary::summary;

/// The output type for a command. This allows the command to return a consistent message and,
/// optionally, structured data to both the command line and MCP server interfaces.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// A message that can be printed to the user regarding the outcome of the command execution.
    message: String,

    /// Any structured data that needs to be output from the call.
    structure: Option<T>,
}

impl<T, S> From<S> for Out<T>
where
    T: Debug + Clone + Serialize,
    S: Into<String>,
{
    fn from(value: S) -> Self {
        Out::new_message(value)
    }
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// Create a new `Out` object that has `Some(structure)`.
    pub fn new<S>(message: S, structure: T) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: Some(structure),
        }
    }

    /// Create a new `Out` object that has `None` for `structure`.
    pub fn new_message<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: None,
        }
    }

    /// Get the `message`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the structured data stored in `structure`.
    pub fn structure(&self) -> Option<&T> {
        self.structure.as_ref()
    }

    /// Print the message to `info!` and the structured data (if it exists) as JSON to `debug!`.
    pub fn print(&self) {
        info!("{}", self.message);
        if let Some(structure) = self.structure() {
            if let Ok(json) = serde_json::to_string_pretty(structure) {
                debug!("Command output:\n\n{json}\n\n");
            }
        }
    }

    /// Print the structured data as JSON to stdout, falling back to `print` when there is none.
    pub fn print_json(&self) -> Result<()> {
        match self.structure() {
            Some(structure) => {
                let json = serde_json::to_string_pretty(structure)
                    .context("Unable to serialize the command output")?;
                println!("{json}");
                Ok(())
            }
            None => {
                self.print();
                Ok(())
            }
        }
    }
}

/// Where a read command takes its ledger from.
#[derive(Debug, Clone)]
pub enum Ledger {
    /// A group in the local store. `None` means the configured default group.
    Store {
        config: Config,
        group: Option<String>,
    },
    /// A standalone JSON ledger file.
    File(PathBuf),
}

impl Ledger {
    pub fn store(config: Config, group: Option<String>) -> Self {
        Self::Store { config, group }
    }

    pub(crate) async fn load(&self) -> Result<Group> {
        match self {
            Ledger::Store { config, group } => {
                let group = config.group(group.as_deref()).pub_result(ErrorType::Request)?;
                config
                    .db()
                    .load_group(group)
                    .await
                    .pub_result(ErrorType::Database)
            }
            Ledger::File(path) => utils::deserialize(path)
                .await
                .with_context(|| format!("Unable to read the ledger file {}", path.display()))
                .pub_result(ErrorType::Request),
        }
    }
}

/// Finds a member by ID, falling back to a case-insensitive name match.
pub(crate) fn resolve_member(roster: &Roster, member: &str) -> Result<MemberId> {
    if let Ok(id) = MemberId::from_str(member) {
        if roster.contains(&id) {
            return Ok(id);
        }
    }
    match roster.find_by_name(member) {
        Some(found) => Ok(found.id.clone()),
        None => bail!("'{member}' is not a member of this group"),
    }
}

fn plural(count: usize, one: &str, many: &str) -> String {
    format!("{count} {}", if count == 1 { one } else { many })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Member;
    use crate::test::TestEnv;

    #[test]
    fn test_resolve_member() {
        let roster = Roster::new([
            Member::with_account("u1", "Ana"),
            Member::shadow("Ben", None, Some("555".into())),
        ]);
        let ben = roster.members()[1].id.clone();
        assert_eq!(
            resolve_member(&roster, "u1").unwrap(),
            MemberId::account("u1")
        );
        assert_eq!(resolve_member(&roster, "ben").unwrap(), ben);
        assert_eq!(resolve_member(&roster, &ben.to_string()).unwrap(), ben);
        assert!(resolve_member(&roster, "Cleo").is_err());
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "entry", "entries"), "1 entry");
        assert_eq!(plural(3, "entry", "entries"), "3 entries");
    }

    #[tokio::test]
    async fn test_ledger_from_store_uses_default_group() {
        let env = TestEnv::new().await;
        env.trip().await;
        let missing = Ledger::store(env.config(), None).load().await;
        assert!(missing.unwrap_err().to_string().starts_with("request error"));

        let mut config = env.config();
        config.set_default_group(TestEnv::TRIP).await.unwrap();
        let group = Ledger::store(config, None).load().await.unwrap();
        assert_eq!(group.name, "Lisbon");
    }

    #[tokio::test]
    async fn test_ledger_from_file() {
        let env = TestEnv::new().await;
        let path = env.config().root().join("ledger.json");
        utils::write(
            &path,
            r#"{"name": "Flat", "members": [{"id": "u1", "name": "Ana"}], "entries": []}"#,
        )
        .await
        .unwrap();
        let group = Ledger::File(path).load().await.unwrap();
        assert_eq!(group.name, "Flat");

        let missing = Ledger::File(env.config().root().join("nope.json")).load().await;
        assert!(missing.is_err());
    }
}
