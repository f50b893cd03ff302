use clap::Parser;
use serde::Serialize;
use settle_up::args::{Args, Command, ExpenseSubcommand, GroupSubcommand, MemberSubcommand};
use settle_up::commands::{self, Ledger, Out};
use settle_up::{Config, Result};
use std::fmt::Debug;
use std::path::Path;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().settle_home().path();

    // Route to appropriate command handler
    match args.command() {
        Command::Init => commands::init(home).await?.print(),

        Command::Group(group_args) => {
            let config = Config::load(home).await?;
            match group_args.action() {
                GroupSubcommand::Create(args) => {
                    commands::create_group(config, args.clone()).await?.print()
                }
            }
        }

        Command::Member(member_args) => {
            let config = Config::load(home).await?;
            match member_args.action() {
                MemberSubcommand::Add(args) => {
                    commands::add_member(config, args.clone()).await?.print()
                }
            }
        }

        Command::Expense(expense_args) => {
            let config = Config::load(home).await?;
            match expense_args.action() {
                ExpenseSubcommand::Add(args) => {
                    commands::add_expense(config, *args.clone()).await?.print()
                }
                ExpenseSubcommand::Delete(args) => {
                    commands::delete_entry(config, args.clone()).await?.print()
                }
            }
        }

        Command::Balances(ledger_args) => {
            let ledger = ledger(home, ledger_args.group.clone(), ledger_args.file.as_deref()).await?;
            output(commands::balances(ledger).await?, ledger_args.json)?
        }

        Command::Settlements(settlements_args) => {
            let ledger_args = &settlements_args.ledger;
            let out = match settlements_args.balances.as_deref() {
                Some(path) => commands::settlements_from_balances(path).await?,
                None => {
                    let ledger =
                        ledger(home, ledger_args.group.clone(), ledger_args.file.as_deref())
                            .await?;
                    commands::settlements(ledger).await?
                }
            };
            output(out, ledger_args.json)?
        }

        Command::Settle(settle_args) => {
            let config = Config::load(home).await?;
            commands::settle(config, settle_args.clone()).await?.print()
        }

        Command::Link(link_args) => {
            let config = Config::load(home).await?;
            commands::link(config, link_args.clone()).await?.print()
        }

        Command::Summary(summary_args) => {
            let config = Config::load(home).await?;
            let out = commands::summary(config, summary_args.clone()).await?;
            output(out, summary_args.json)?
        }

        Command::Spending(ledger_args) => {
            let ledger = ledger(home, ledger_args.group.clone(), ledger_args.file.as_deref()).await?;
            output(commands::spending(ledger).await?, ledger_args.json)?
        }

        Command::Mcp(_mcp_args) => commands::mcp(Config::load(home).await?).await?.print(),
    };
    Ok(())
}

/// A ledger file is read without touching the settle home, so it works before `settle init`.
async fn ledger(home: &Path, group: Option<String>, file: Option<&Path>) -> Result<Ledger> {
    Ok(match file {
        Some(path) => Ledger::File(path.to_path_buf()),
        None => Ledger::store(Config::load(home).await?, group),
    })
}

fn output<T>(out: Out<T>, json: bool) -> Result<()>
where
    T: Serialize + Clone + Debug,
{
    if json {
        out.print_json()
    } else {
        out.print();
        Ok(())
    }
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for the library and binary only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
