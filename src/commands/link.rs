use crate::args::LinkArgs;
use crate::commands::{plural, Out};
use crate::db::LinkReport;
use crate::error::{ErrorType, IntoResult};
use crate::model::MemberId;
use crate::{Config, Result};
use anyhow::{anyhow, Context};
use std::str::FromStr;
use tracing::info;

/// Replaces the shadow ID of everyone added with `email` or `phone` by `account_id`, in every
/// group, including the ledger entries that reference them.
///
/// A backup of the SQLite file is taken first. The rewrite itself is one transaction, and running
/// it again after it succeeded finds nothing to change. If the account is already a member of a
/// group, the shadow member is merged into it.
pub async fn link(config: Config, args: LinkArgs) -> Result<Out<LinkReport>> {
    let account = MemberId::from_str(&args.account_id).pub_result(ErrorType::Request)?;
    if account.is_shadow() {
        return Err(anyhow!(
            "'{account}' is a shadow ID, link to a registered account ID"
        ))
        .pub_result(ErrorType::Request);
    }
    let email = args.email.as_deref().filter(|s| !s.trim().is_empty());
    let phone = args.phone.as_deref().filter(|s| !s.trim().is_empty());
    if email.is_none() && phone.is_none() {
        return Err(anyhow!(
            "An email or a phone number is needed to find shadow members"
        ))
        .pub_result(ErrorType::Request);
    }

    let backup = config
        .backup()
        .copy_sqlite()
        .await
        .context("Unable to back up the ledger before linking")
        .pub_result(ErrorType::Database)?;
    info!("Backed up the ledger to {}", backup.display());

    let report = config
        .db()
        .link_account(&account, email, phone)
        .await
        .pub_result(ErrorType::Database)?;
    let message = if report.is_empty() {
        format!("No shadow members to link to {account}")
    } else {
        format!(
            "Linked {account} in {}, rewriting {} and {}",
            plural(report.groups.len(), "group", "groups"),
            plural(report.entries as usize, "payer", "payers"),
            plural(report.splits as usize, "split", "splits"),
        )
    };
    Ok(Out::new(message, report))
}
