//! These structs provide the CLI interface for the settle CLI.
//!
//! The argument structs of commands that are also MCP tools double as the tool parameters, so they
//! derive `Deserialize` and `JsonSchema` next to `Parser`. Fields that only make sense on the
//! command line are skipped by serde.

use crate::model::{Amount, DEFAULT_CATEGORY};
use anyhow::Context;
use clap::{Parser, Subcommand};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// settle: split shared expenses and settle up with the fewest payments.
///
/// Keep a ledger of who paid for what in a group, see everyone's balance, and get a short list of
/// payments that clears every debt. Recording one of those payments updates the balances.
///
/// There is also a mode in which an AI agent, like Claude or Claude Code, can use this program
/// through the mcp subcommand.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory, the configuration file and an empty ledger.
    ///
    /// This is the first command you should run. By default the data lives in $HOME/settle; pass
    /// --settle-home or set SETTLE_HOME to put it somewhere else.
    Init,
    /// Manage groups.
    Group(GroupArgs),
    /// Manage the members of a group.
    Member(MemberArgs),
    /// Add or delete expenses.
    Expense(ExpenseArgs),
    /// Show what each member is owed (positive) or owes (negative).
    Balances(LedgerArgs),
    /// Show the fewest payments that settle every balance.
    Settlements(SettlementsArgs),
    /// Record that one member paid another.
    Settle(SettleArgs),
    /// Turn a shadow member into a registered account everywhere it appears.
    Link(LinkArgs),
    /// Show one person's position in a group.
    Summary(SummaryArgs),
    /// Show spending by category and by member, leaving settlements out.
    Spending(LedgerArgs),
    /// Run the MCP server on stdin/stdout for use by an AI agent.
    Mcp(McpArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where settle data and configuration is held. Defaults to ~/settle
    #[arg(long, env = "SETTLE_HOME", default_value_t = default_settle_home())]
    settle_home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, settle_home: PathBuf) -> Self {
        Self {
            log_level,
            settle_home: settle_home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn settle_home(&self) -> &DisplayPath {
        &self.settle_home
    }
}

/// (Not shown): Args for the `settle group` command.
#[derive(Debug, Parser, Clone)]
pub struct GroupArgs {
    #[command(subcommand)]
    action: GroupSubcommand,
}

impl GroupArgs {
    pub fn action(&self) -> &GroupSubcommand {
        &self.action
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum GroupSubcommand {
    /// Create a new group.
    Create(CreateGroupArgs),
}

/// Args for `settle group create`.
#[derive(Debug, Parser, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateGroupArgs {
    /// The name of the group, e.g. "Lisbon trip".
    #[arg(long)]
    pub name: String,

    /// A short ID for the group. Generated when not given.
    #[arg(long)]
    pub id: Option<String>,

    /// Make this the group commands use when --group is not given. The first group created
    /// becomes the default automatically.
    #[arg(long)]
    #[serde(default)]
    pub default: bool,
}

/// (Not shown): Args for the `settle member` command.
#[derive(Debug, Parser, Clone)]
pub struct MemberArgs {
    #[command(subcommand)]
    action: MemberSubcommand,
}

impl MemberArgs {
    pub fn action(&self) -> &MemberSubcommand {
        &self.action
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum MemberSubcommand {
    /// Add a member to a group.
    Add(AddMemberArgs),
}

/// Args for `settle member add`.
#[derive(Debug, Parser, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddMemberArgs {
    /// The group ID. Defaults to the configured default group.
    #[arg(long)]
    pub group: Option<String>,

    /// The member's display name.
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub phone: Option<String>,

    /// The member's registered account ID. Without one, the member gets a shadow ID derived from
    /// their email, phone or name, which `settle link` later replaces.
    #[arg(long)]
    pub account_id: Option<String>,
}

/// (Not shown): Args for the `settle expense` command.
#[derive(Debug, Parser, Clone)]
pub struct ExpenseArgs {
    #[command(subcommand)]
    action: ExpenseSubcommand,
}

impl ExpenseArgs {
    pub fn action(&self) -> &ExpenseSubcommand {
        &self.action
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ExpenseSubcommand {
    /// Add an expense to a group's ledger.
    Add(Box<AddExpenseArgs>),
    /// Delete an entry. Deleted entries stay in the ledger but no longer count.
    Delete(DeleteEntryArgs),
}

/// One member's share of an expense, written `MEMBER=AMOUNT` on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SplitArg {
    /// A member ID or name.
    pub member: String,
    #[schemars(with = "f64")]
    pub amount: Amount,
}

impl FromStr for SplitArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (member, amount) = s
            .rsplit_once('=')
            .with_context(|| format!("Expected MEMBER=AMOUNT, got '{s}'"))?;
        let member = member.trim();
        anyhow::ensure!(!member.is_empty(), "Missing the member in '{s}'");
        let amount = Amount::from_str(amount)
            .with_context(|| format!("Invalid amount in '{s}'"))?;
        Ok(Self {
            member: member.to_string(),
            amount,
        })
    }
}

impl Display for SplitArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.member, self.amount.value())
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Args for `settle expense add`.
///
/// Members can be given by ID or by name. Either list each share with `--split` or split the
/// amount equally with `--equal`.
#[derive(Debug, Parser, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddExpenseArgs {
    /// The group ID. Defaults to the configured default group.
    #[arg(long)]
    pub group: Option<String>,

    /// The total amount of the expense, e.g. 42.50.
    #[arg(long)]
    #[schemars(with = "f64")]
    pub amount: Amount,

    /// The member who paid.
    #[arg(long)]
    pub payer: String,

    /// A member's share as MEMBER=AMOUNT. Repeat for each member.
    #[arg(long = "split", conflicts_with = "equal")]
    #[serde(default)]
    pub splits: Vec<SplitArg>,

    /// Members who share the amount equally, comma separated. Leftover cents go to the first
    /// members listed.
    #[arg(long, value_delimiter = ',')]
    #[serde(default)]
    pub equal: Vec<String>,

    /// The spending category. "Settlement" is reserved for recorded payments.
    #[arg(long, default_value = DEFAULT_CATEGORY)]
    #[serde(default = "default_category")]
    pub category: String,

    #[arg(long)]
    pub description: Option<String>,

    /// An idempotency key. Adding an expense with a key that was already used does nothing.
    #[arg(long)]
    pub key: Option<String>,
}

/// Args for `settle expense delete`.
#[derive(Debug, Parser, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeleteEntryArgs {
    /// The group ID. Defaults to the configured default group.
    #[arg(long)]
    pub group: Option<String>,

    /// The ID of the entry to delete.
    #[arg(long)]
    pub id: String,
}

/// Where to read a ledger from: a group in the local store or a JSON ledger file.
#[derive(Debug, Parser, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LedgerArgs {
    /// The group ID. Defaults to the configured default group.
    #[arg(long)]
    pub group: Option<String>,

    /// Read the ledger from a JSON file instead of the local store.
    #[arg(long, conflicts_with = "group")]
    #[serde(skip)]
    pub file: Option<PathBuf>,

    /// Print the result as JSON on stdout.
    #[arg(long)]
    #[serde(skip)]
    pub json: bool,
}

/// Args for `settle settlements`.
#[derive(Debug, Parser, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SettlementsArgs {
    #[clap(flatten)]
    #[serde(flatten)]
    pub ledger: LedgerArgs,

    /// Read a balance map such as {"u1": 12.5, "u2": -12.5} from a JSON file instead of a ledger.
    #[arg(long, conflicts_with_all = ["group", "file"])]
    #[serde(skip)]
    pub balances: Option<PathBuf>,
}

/// Args for `settle settle`.
#[derive(Debug, Parser, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SettleArgs {
    /// The group ID. Defaults to the configured default group.
    #[arg(long)]
    pub group: Option<String>,

    /// The member who paid.
    #[arg(long)]
    pub from: String,

    /// The member who was paid.
    #[arg(long)]
    pub to: String,

    #[arg(long)]
    #[schemars(with = "f64")]
    pub amount: Amount,

    /// An idempotency key. Without one, recording the same payment twice before any new expense
    /// is added records it once.
    #[arg(long)]
    pub key: Option<String>,
}

/// Args for `settle link`.
#[derive(Debug, Parser, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LinkArgs {
    /// The registered account ID that replaces the shadow ID.
    #[arg(long)]
    pub account_id: String,

    /// The email the shadow member was added with.
    #[arg(long, required_unless_present = "phone")]
    pub email: Option<String>,

    /// The phone number the shadow member was added with.
    #[arg(long)]
    pub phone: Option<String>,
}

/// Args for `settle summary`. Give any of the handles the person is known by.
#[derive(Debug, Parser, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SummaryArgs {
    /// The group ID. Defaults to the configured default group.
    #[arg(long)]
    pub group: Option<String>,

    #[arg(long)]
    pub account_id: Option<String>,

    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub phone: Option<String>,

    #[arg(long)]
    pub name: Option<String>,

    /// Print the result as JSON on stdout.
    #[arg(long)]
    #[serde(skip)]
    pub json: bool,
}

/// (Not shown): Args for the `settle mcp` command.
#[derive(Debug, Parser, Clone)]
pub struct McpArgs {}

fn default_settle_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("settle"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --settle-home or SETTLE_HOME instead of relying on the default \
                settle home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("settle")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn path(&self) -> &Path {
        &self.0
    }
}
