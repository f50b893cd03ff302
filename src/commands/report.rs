//! Read-only reports over a group's ledger: balances, suggested settlements and spending.

use crate::commands::{plural, Ledger, Out};
use crate::error::{ErrorType, IntoResult};
use crate::model::{Amount, MemberId, Roster, UNKNOWN_NAME};
use crate::settle::{
    consumption_by_member, simplify, spending_by_category, total_spend, verify, Balances,
    SettlementSuggestion,
};
use crate::{utils, Result};
use anyhow::Context;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;
use tracing::error;

/// Spending in a group, settlements left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpendingReport {
    pub total: Amount,
    /// Total per category, in the order categories first appear in the ledger.
    pub by_category: IndexMap<String, Amount>,
    /// Each member's share of the spending.
    pub by_member: Balances,
}

fn member_name<'a>(roster: &'a Roster, balances: &'a Balances, id: &MemberId) -> &'a str {
    roster
        .get(id)
        .map(|m| m.name.as_str())
        .or_else(|| balances.label(id))
        .unwrap_or(UNKNOWN_NAME)
}

fn signed(amount: Amount) -> String {
    if amount.is_positive() {
        format!("+{amount}")
    } else {
        amount.to_string()
    }
}

/// Computes what each member is owed (positive) or owes (negative).
pub async fn balances(ledger: Ledger) -> Result<Out<Balances>> {
    let group = ledger.load().await?;
    let roster = group.roster();
    let balances = group.balances();

    let mut message = format!("Balances for '{}':", group.name);
    for (id, amount) in balances.iter() {
        let _ = write!(
            message,
            "\n  {}: {}",
            member_name(&roster, &balances, id),
            signed(amount)
        );
    }
    if balances.is_empty() {
        message.push_str(" nobody has any expenses yet");
    }
    Ok(Out::new(message, balances))
}

/// Computes the payments that settle every balance in the group.
///
/// The suggestions are checked against the balances before they are returned. If that check fails
/// nothing is returned and the caller can safely try again.
pub async fn settlements(ledger: Ledger) -> Result<Out<Vec<SettlementSuggestion>>> {
    let group = ledger.load().await?;
    let roster = group.roster();
    let balances = group.balances();
    suggest(&balances, &roster, &group.name)
}

/// Computes settlements for a balance map read from a JSON file such as
/// `{"u1": 12.5, "u2": -12.5}`.
pub async fn settlements_from_balances(path: &Path) -> Result<Out<Vec<SettlementSuggestion>>> {
    let value: serde_json::Value = utils::deserialize(path)
        .await
        .with_context(|| format!("Unable to read the balances file {}", path.display()))
        .pub_result(ErrorType::Request)?;
    let balances = Balances::from_json(&value).pub_result(ErrorType::Request)?;
    suggest(&balances, &Roster::default(), "the balances file")
}

fn suggest(
    balances: &Balances,
    roster: &Roster,
    label: &str,
) -> Result<Out<Vec<SettlementSuggestion>>> {
    let suggestions = simplify(balances, roster);
    if let Err(e) = verify(balances, &suggestions) {
        error!("Discarding settlements that do not match the balances: {e}");
        return Err(e)
            .context("Unable to compute settlements, please try again")
            .pub_result(ErrorType::Internal);
    }

    if suggestions.is_empty() {
        return Ok(Out::new(
            format!("Everyone in {label} is settled up"),
            suggestions,
        ));
    }
    let mut message = format!(
        "{} to settle {label}:",
        plural(suggestions.len(), "payment", "payments")
    );
    for s in &suggestions {
        let _ = write!(message, "\n  {} pays {} {}", s.from.name, s.to.name, s.amount);
    }
    Ok(Out::new(message, suggestions))
}

/// Reports spending by category and by member. Settlements are transfers, not spending, and are
/// left out.
pub async fn spending(ledger: Ledger) -> Result<Out<SpendingReport>> {
    let group = ledger.load().await?;
    let roster = group.roster();
    let report = SpendingReport {
        total: total_spend(group.live_entries()),
        by_category: spending_by_category(group.live_entries()),
        by_member: consumption_by_member(&roster, group.live_entries()),
    };

    let mut message = format!("'{}' spent {} in total", group.name, report.total);
    for (category, amount) in &report.by_category {
        let _ = write!(message, "\n  {category}: {amount}");
    }
    Ok(Out::new(message, report))
}
