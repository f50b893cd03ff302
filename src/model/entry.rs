//! Ledger entries: expenses and the settlement payments that offset them.

use crate::model::amount::{round2, Amount, SPLIT_TOLERANCE};
use crate::model::member::MemberId;
use crate::model::reference::{Reference, Roster};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The reserved category that marks an entry as a payment between members rather than spending.
pub const SETTLEMENT_CATEGORY: &str = "Settlement";

/// The category given to expenses that do not name one.
pub const DEFAULT_CATEGORY: &str = "General";

/// Returns true if `category` is the reserved settlement category.
pub fn is_settlement_category(category: &str) -> bool {
    category.trim().eq_ignore_ascii_case(SETTLEMENT_CATEGORY)
}

/// One member's share of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    #[serde(default)]
    pub member: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_name_fallback: Option<String>,
    pub amount: Amount,
}

impl Split {
    pub fn new(member: impl Into<Reference>, amount: Amount) -> Self {
        Self {
            member: Some(member.into()),
            member_name_fallback: None,
            amount,
        }
    }

    /// The member reference with the denormalized fallback name folded in.
    pub fn reference(&self) -> Reference {
        Reference::normalize(self.member.as_ref(), self.member_name_fallback.as_deref())
    }
}

/// An expense or settlement as stored in a group's ledger.
///
/// The ledger is append-only for balance purposes: accepting a settlement appends a new entry and
/// deleting only sets `deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub amount: Amount,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub payer: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_name_fallback: Option<String>,
    #[serde(default)]
    pub splits: Vec<Split>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl LedgerEntry {
    /// Creates an expense entry paid by `payer`.
    pub fn expense(
        amount: Amount,
        payer: impl Into<Reference>,
        category: impl Into<String>,
        splits: Vec<Split>,
    ) -> Self {
        Self {
            id: None,
            description: None,
            amount,
            category: category.into(),
            payer: Some(payer.into()),
            payer_name_fallback: None,
            splits,
            deleted: false,
            created_at: None,
        }
    }

    /// Creates the entry that records `from` paying `amount` to `to`.
    ///
    /// The debtor is the payer and the creditor is the single split, so the entry cancels the
    /// corresponding balances when aggregated.
    pub fn settlement(from: impl Into<Reference>, to: impl Into<Reference>, amount: Amount) -> Self {
        Self {
            description: Some("Settlement".to_string()),
            ..Self::expense(
                amount,
                from,
                SETTLEMENT_CATEGORY,
                vec![Split::new(to, amount)],
            )
        }
    }

    pub fn is_settlement(&self) -> bool {
        is_settlement_category(&self.category)
    }

    /// The payer reference with the denormalized fallback name folded in.
    pub fn payer(&self) -> Reference {
        Reference::normalize(self.payer.as_ref(), self.payer_name_fallback.as_deref())
    }

    pub fn split_total(&self) -> Amount {
        self.splits.iter().map(|s| s.amount).sum()
    }
}

/// Why a proposed entry was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("the amount must be greater than zero, got {0}")]
    NonPositiveAmount(Amount),
    #[error("an entry needs at least one split")]
    NoSplits,
    #[error("split amounts cannot be negative, got {amount} for {member}")]
    NegativeSplit { member: MemberId, amount: Amount },
    #[error("the splits add up to {splits} but the amount is {amount}")]
    SplitMismatch { amount: Amount, splits: Amount },
    #[error("{0} appears more than once in the splits")]
    DuplicateSplitMember(MemberId),
    #[error("{0} is not a member of this group")]
    UnknownMember(MemberId),
}

/// A fully resolved entry that has not yet been accepted into a ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub description: Option<String>,
    pub amount: Amount,
    pub category: String,
    pub payer: MemberId,
    pub splits: Vec<(MemberId, Amount)>,
}

impl NewEntry {
    /// Checks everything the ledger assumes about an entry before it is written.
    ///
    /// The balance aggregator does not re-check any of this.
    pub fn validate(&self, roster: &Roster) -> Result<(), EntryError> {
        if !self.amount.is_positive() {
            return Err(EntryError::NonPositiveAmount(self.amount));
        }
        if self.splits.is_empty() {
            return Err(EntryError::NoSplits);
        }
        if !roster.contains(&self.payer) {
            return Err(EntryError::UnknownMember(self.payer.clone()));
        }

        let mut seen = HashSet::new();
        for (member, amount) in &self.splits {
            if !roster.contains(member) {
                return Err(EntryError::UnknownMember(member.clone()));
            }
            if amount.is_negative() {
                return Err(EntryError::NegativeSplit {
                    member: member.clone(),
                    amount: *amount,
                });
            }
            // A payer listed twice would be debited twice for a single share
            if !seen.insert(member) {
                return Err(EntryError::DuplicateSplitMember(member.clone()));
            }
        }

        let splits: Amount = self.splits.iter().map(|(_, a)| *a).sum();
        if (splits - self.amount).abs().value() > SPLIT_TOLERANCE {
            return Err(EntryError::SplitMismatch {
                amount: self.amount,
                splits,
            });
        }
        Ok(())
    }

    /// Converts into a ledger entry whose references are populated from the roster.
    pub fn into_ledger_entry(self, roster: &Roster) -> LedgerEntry {
        let reference = |id: MemberId| match roster.get(&id) {
            Some(member) => Reference::from(member),
            None => Reference::Id(id),
        };
        let splits = self
            .splits
            .into_iter()
            .map(|(id, amount)| Split::new(reference(id), amount))
            .collect();
        LedgerEntry {
            description: self.description,
            ..LedgerEntry::expense(self.amount, reference(self.payer), self.category, splits)
        }
    }
}

/// Splits `amount` equally between `members`, to the cent.
///
/// Leftover cents go one each to the first members so the shares add up to exactly `amount`.
///
/// ```
/// # use settle_up::model::{split_equally, Amount, MemberId};
/// let members = [MemberId::account("a"), MemberId::account("b"), MemberId::account("c")];
/// let shares = split_equally(Amount::from_cents(1000), &members);
/// let cents: Vec<_> = shares.iter().map(|(_, a)| a.to_string()).collect();
/// assert_eq!(cents, ["$3.34", "$3.33", "$3.33"]);
/// ```
pub fn split_equally(amount: Amount, members: &[MemberId]) -> Vec<(MemberId, Amount)> {
    if members.is_empty() {
        return Vec::new();
    }
    let total_cents = round2(amount.value()) * Decimal::ONE_HUNDRED;
    let count = Decimal::from(members.len());
    let base = (total_cents / count).floor();
    let mut remainder = total_cents - base * count;

    members
        .iter()
        .map(|member| {
            let mut cents = base;
            if remainder > Decimal::ZERO {
                cents += Decimal::ONE;
                remainder -= Decimal::ONE;
            }
            (member.clone(), Amount::new(cents / Decimal::ONE_HUNDRED))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::member::Member;
    use std::str::FromStr;

    fn roster() -> Roster {
        Roster::new([
            Member::with_account("a", "Ana"),
            Member::with_account("b", "Ben"),
            Member::with_account("c", "Cleo"),
        ])
    }

    fn id(s: &str) -> MemberId {
        MemberId::account(s)
    }

    fn amt(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    fn entry(amount: &str, payer: &str, splits: &[(&str, &str)]) -> NewEntry {
        NewEntry {
            description: None,
            amount: amt(amount),
            category: DEFAULT_CATEGORY.into(),
            payer: id(payer),
            splits: splits.iter().map(|(m, a)| (id(m), amt(a))).collect(),
        }
    }

    #[test]
    fn test_settlement_category_match() {
        assert!(is_settlement_category("Settlement"));
        assert!(is_settlement_category("  settlement "));
        assert!(!is_settlement_category("Food"));
    }

    #[test]
    fn test_settlement_entry_shape() {
        let entry = LedgerEntry::settlement(id("b"), id("a"), amt("25"));
        assert!(entry.is_settlement());
        assert_eq!(entry.payer(), Reference::Id(id("b")));
        assert_eq!(entry.splits.len(), 1);
        assert_eq!(entry.splits[0].reference(), Reference::Id(id("a")));
        assert_eq!(entry.split_total(), amt("25"));
    }

    #[test]
    fn test_deserialize_wire_entry() {
        let json = r#"{
            "amount": 30,
            "category": "Food",
            "payer": {"id": "a", "name": "Ana"},
            "splits": [
                {"member": "a", "amount": 10},
                {"member": null, "memberNameFallback": "Ben", "amount": "10.00"},
                {"member": {"id": "c"}, "amount": 10.0}
            ]
        }"#;
        let entry: LedgerEntry = serde_json::from_str(json).unwrap();
        assert!(!entry.deleted);
        assert!(!entry.is_settlement());
        assert_eq!(entry.split_total(), amt("30"));
        assert_eq!(entry.splits[1].reference().name(), Some("Ben"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let entry: LedgerEntry = serde_json::from_str(r#"{"amount": 5}"#).unwrap();
        assert_eq!(entry.category, DEFAULT_CATEGORY);
        assert!(entry.splits.is_empty());
        assert_eq!(entry.payer(), Reference::unresolved());
    }

    #[test]
    fn test_validate_ok() {
        let e = entry("30", "a", &[("a", "10"), ("b", "10"), ("c", "10")]);
        assert_eq!(e.validate(&roster()), Ok(()));
    }

    #[test]
    fn test_validate_tolerates_small_remainder() {
        let e = entry("100", "a", &[("a", "33.33"), ("b", "33.33"), ("c", "33.33")]);
        assert_eq!(e.validate(&roster()), Ok(()));
    }

    #[test]
    fn test_validate_mismatch() {
        let e = entry("100", "a", &[("a", "33"), ("b", "33"), ("c", "33")]);
        assert!(matches!(
            e.validate(&roster()),
            Err(EntryError::SplitMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_double_counted_payer() {
        let e = entry("20", "a", &[("a", "10"), ("a", "10")]);
        assert_eq!(
            e.validate(&roster()),
            Err(EntryError::DuplicateSplitMember(id("a")))
        );
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let r = roster();
        assert!(matches!(
            entry("0", "a", &[("a", "0")]).validate(&r),
            Err(EntryError::NonPositiveAmount(_))
        ));
        assert_eq!(entry("10", "a", &[]).validate(&r), Err(EntryError::NoSplits));
        assert_eq!(
            entry("10", "z", &[("a", "10")]).validate(&r),
            Err(EntryError::UnknownMember(id("z")))
        );
        assert!(matches!(
            entry("10", "a", &[("a", "20"), ("b", "-10")]).validate(&r),
            Err(EntryError::NegativeSplit { .. })
        ));
    }

    #[test]
    fn test_into_ledger_entry_populates_names() {
        let e = entry("20", "a", &[("b", "20")]).into_ledger_entry(&roster());
        assert_eq!(
            e.payer(),
            Reference::Populated {
                id: id("a"),
                name: "Ana".into()
            }
        );
        assert_eq!(e.splits[0].reference().name(), Some("Ben"));
    }

    #[test]
    fn test_split_equally() {
        let members = [id("a"), id("b"), id("c")];
        let shares = split_equally(amt("100"), &members);
        let total: Amount = shares.iter().map(|(_, a)| *a).sum();
        assert_eq!(total, amt("100"));
        assert_eq!(shares[0].1, amt("33.34"));
        assert_eq!(shares[2].1, amt("33.33"));

        assert!(split_equally(amt("10"), &[]).is_empty());
    }

    #[test]
    fn test_split_equally_exact() {
        let members = [id("a"), id("b"), id("c"), id("d")];
        let shares = split_equally(amt("400"), &members);
        assert!(shares.iter().all(|(_, a)| *a == amt("100")));
    }
}
