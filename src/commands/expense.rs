//! Expense command handlers.

use crate::args::{AddExpenseArgs, DeleteEntryArgs};
use crate::commands::{resolve_member, Out};
use crate::db::{Deletion, EntryReceipt};
use crate::error::{ErrorType, IntoResult};
use crate::model::{is_settlement_category, split_equally, NewEntry, Roster, SETTLEMENT_CATEGORY};
use crate::{Config, Result};
use anyhow::{anyhow, bail, Context};
use tracing::debug;

/// Adds an expense to a group's ledger.
///
/// The payer and every member in the splits must belong to the group, the amount must be positive,
/// and the splits must add up to the amount within ten cents. Settlements are recorded with
/// `settle`, so the "Settlement" category is refused here.
///
/// # Errors
/// - Returns a request error if the expense is invalid.
/// - Returns a database error if the ledger cannot be read or written.
pub async fn add_expense(config: Config, args: AddExpenseArgs) -> Result<Out<EntryReceipt>> {
    let group_arg = args.group.clone();
    let group = config
        .group(group_arg.as_deref())
        .pub_result(ErrorType::Request)?;
    let roster = config
        .db()
        .load_group(group)
        .await
        .pub_result(ErrorType::Database)?
        .roster();

    let key = args.key.clone();
    let entry = build_entry(&roster, args).pub_result(ErrorType::Request)?;
    debug!("Adding {entry:?} to {group}");
    let amount = entry.amount;

    let receipt = config
        .db()
        .insert_entry(group, entry, key.as_deref())
        .await
        .pub_result(ErrorType::Database)?;
    let message = if receipt.written {
        format!("Added a {amount} expense to '{group}' as {}", receipt.entry_id)
    } else {
        format!(
            "An expense with this key already exists as {}, nothing was added",
            receipt.entry_id
        )
    };
    Ok(Out::new(message, receipt))
}

/// Resolves member names and checks the expense against the group's members.
fn build_entry(roster: &Roster, args: AddExpenseArgs) -> Result<NewEntry> {
    let category = args.category.trim();
    if is_settlement_category(category) {
        bail!("The '{SETTLEMENT_CATEGORY}' category is reserved for payments recorded with settle");
    }

    let payer = resolve_member(roster, &args.payer).context("Invalid payer")?;
    let splits = match (args.splits.is_empty(), args.equal.is_empty()) {
        (false, true) => args
            .splits
            .iter()
            .map(|split| Ok((resolve_member(roster, &split.member)?, split.amount)))
            .collect::<Result<Vec<_>>>()?,
        (true, false) => {
            let members = args
                .equal
                .iter()
                .map(|m| resolve_member(roster, m.trim()))
                .collect::<Result<Vec<_>>>()?;
            split_equally(args.amount, &members)
        }
        (true, true) => bail!("Give the shares with splits, or the members to split equally"),
        (false, false) => bail!("Give either explicit splits or an equal split, not both"),
    };

    let entry = NewEntry {
        description: args.description.filter(|d| !d.trim().is_empty()),
        amount: args.amount,
        category: category.to_string(),
        payer,
        splits,
    };
    entry.validate(roster)?;
    Ok(entry)
}

/// Soft-deletes an expense. Deleted entries stay in the ledger but no longer affect balances.
///
/// # Errors
/// - Returns a request error for a settlement entry. A recorded payment is permanent, and a
///   mistaken one is undone by settling in the other direction.
pub async fn delete_entry(config: Config, args: DeleteEntryArgs) -> Result<Out<()>> {
    let group = config
        .group(args.group.as_deref())
        .pub_result(ErrorType::Request)?;
    let deletion = config
        .db()
        .delete_entry(group, &args.id)
        .await
        .pub_result(ErrorType::Database)?;
    match deletion {
        Deletion::Deleted => Ok(format!("Deleted entry {} from '{group}'", args.id).into()),
        Deletion::AlreadyDeleted => Ok(format!("Entry {} was already deleted", args.id).into()),
        Deletion::Settlement => Err(anyhow!(
            "Entry {} is a settlement and cannot be deleted, record a payment the other way \
             to reverse it",
            args.id
        ))
        .pub_result(ErrorType::Request),
    }
}
