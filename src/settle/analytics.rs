//! Spending totals. Settlement entries move money between members but are not spending, so they
//! are left out of everything here.

use crate::model::{settle_dust, Amount, LedgerEntry, MemberId, Roster};
use crate::settle::Balances;
use indexmap::IndexMap;
use rust_decimal::Decimal;

fn spend_entries<'e>(
    entries: impl IntoIterator<Item = &'e LedgerEntry>,
) -> impl Iterator<Item = &'e LedgerEntry> {
    entries
        .into_iter()
        .filter(|e| !e.deleted && !e.is_settlement())
}

/// Total spend per category, in the order categories first appear.
pub fn spending_by_category<'e>(
    entries: impl IntoIterator<Item = &'e LedgerEntry>,
) -> IndexMap<String, Amount> {
    let mut totals: IndexMap<String, Amount> = IndexMap::new();
    for entry in spend_entries(entries) {
        *totals.entry(entry.category.trim().to_string()).or_default() += entry.amount;
    }
    totals
}

/// Total spend across all categories.
pub fn total_spend<'e>(entries: impl IntoIterator<Item = &'e LedgerEntry>) -> Amount {
    spend_entries(entries).map(|e| e.amount).sum()
}

/// How much of the group's spending each member consumed, i.e. the sum of their split shares.
pub fn consumption_by_member<'e>(
    roster: &Roster,
    entries: impl IntoIterator<Item = &'e LedgerEntry>,
) -> Balances {
    let mut shares: IndexMap<MemberId, Decimal> = roster
        .members()
        .iter()
        .map(|m| (m.id.clone(), Decimal::ZERO))
        .collect();
    for entry in spend_entries(entries) {
        for split in &entry.splits {
            if let Some(id) = roster.resolve(&split.reference(), None) {
                *shares.entry(id).or_default() += split.amount.value();
            }
        }
    }
    shares
        .into_iter()
        .map(|(id, share)| (id, Amount::new(settle_dust(share))))
        .collect()
}
