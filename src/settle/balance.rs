use crate::model::{settle_dust, Amount, Group, LedgerEntry, MemberId, Roster};
use crate::settle::SettleError;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::str::FromStr;

/// The net position of each member of a group: positive means the member is owed money, negative
/// means the member owes money.
///
/// Order is significant. Roster members come first in roster order, followed by any unknown members
/// the ledger referenced, in the order they were first seen. The settlement simplifier breaks ties
/// by this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Balances {
    values: IndexMap<MemberId, Amount>,
    /// Display names for members that are not on the roster.
    labels: HashMap<MemberId, String>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a member's balance, keeping its position if it is already present.
    pub fn insert(&mut self, id: MemberId, amount: Amount) {
        self.values.insert(id, amount);
    }

    /// The balance of `id`, or zero for a member that is not present.
    pub fn get(&self, id: &MemberId) -> Amount {
        self.values.get(id).copied().unwrap_or_default()
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.values.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, Amount)> {
        self.values.iter().map(|(id, a)| (id, *a))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The display name recorded for a member who is not on the roster.
    pub fn label(&self, id: &MemberId) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    /// The sum of all balances. Zero for any ledger whose entries have exact splits.
    pub fn total(&self) -> Amount {
        self.values.values().copied().sum()
    }

    /// True when nobody owes anybody anything.
    pub fn is_settled(&self) -> bool {
        self.values.values().all(|a| a.is_zero())
    }

    /// Number of members with a nonzero balance.
    pub fn nonzero_count(&self) -> usize {
        self.values.values().filter(|a| !a.is_zero()).count()
    }

    /// Reads a balance map from a raw JSON value such as `{"u1": 12.5, "u2": -12.5}`.
    ///
    /// Each balance is rounded to the cent, as the aggregator does, so payments rounded by the
    /// simplifier still clear them.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SettleError> {
        let map = value.as_object().ok_or_else(|| {
            SettleError::MalformedBalances("expected an object of member id to amount".into())
        })?;
        let mut balances = Balances::new();
        for (key, raw) in map {
            let id = MemberId::from_str(key)
                .map_err(|e| SettleError::MalformedBalances(e.to_string()))?;
            let amount = match raw {
                serde_json::Value::Number(_) | serde_json::Value::String(_) => {
                    serde_json::from_value::<Amount>(raw.clone()).map_err(|e| {
                        SettleError::MalformedBalances(format!("balance of {key}: {e}"))
                    })?
                }
                other => {
                    return Err(SettleError::MalformedBalances(format!(
                        "balance of {key} is not a number: {other}"
                    )))
                }
            };
            balances.insert(id, Amount::new(settle_dust(amount.value())));
        }
        Ok(balances)
    }
}

impl FromIterator<(MemberId, Amount)> for Balances {
    fn from_iter<T: IntoIterator<Item = (MemberId, Amount)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
            labels: HashMap::new(),
        }
    }
}

impl Serialize for Balances {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.values.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Balances {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = IndexMap::<MemberId, Amount>::deserialize(deserializer)?;
        Ok(Self {
            values,
            labels: HashMap::new(),
        })
    }
}

/// Turns a group's ledger into per-member balances.
#[derive(Debug, Clone, Copy)]
pub struct BalanceAggregator<'a> {
    roster: &'a Roster,
}

impl<'a> BalanceAggregator<'a> {
    pub fn new(roster: &'a Roster) -> Self {
        Self { roster }
    }

    /// Computes the balance of every member.
    ///
    /// The payer of each live entry is credited with the entry amount and each split member is
    /// debited their share. Settlement entries go through exactly the same path, which is what makes
    /// a recorded payment cancel the debt it pays off.
    ///
    /// Nothing in a malformed entry can fail the whole computation:
    /// - an entry with no splits, or whose payer cannot be attributed, is skipped;
    /// - a split that cannot be attributed is skipped and its amount is not credited to the payer.
    ///
    /// Results are rounded to cents, and anything smaller than a cent becomes zero.
    pub fn aggregate<'e>(&self, entries: impl IntoIterator<Item = &'e LedgerEntry>) -> Balances {
        let mut sums: IndexMap<MemberId, Decimal> = self
            .roster
            .members()
            .iter()
            .map(|m| (m.id.clone(), Decimal::ZERO))
            .collect();
        let mut labels = HashMap::new();

        for entry in entries {
            if entry.deleted || entry.splits.is_empty() {
                continue;
            }
            let payer_ref = entry.payer();
            let Some(payer) = self.roster.resolve(&payer_ref, None) else {
                continue;
            };

            let mut credit = entry.amount.value();
            let mut debits = Vec::with_capacity(entry.splits.len());
            for split in &entry.splits {
                let reference = split.reference();
                match self.roster.resolve(&reference, None) {
                    Some(id) => {
                        self.label_unknown(&mut labels, &id, reference.name());
                        debits.push((id, split.amount.value()));
                    }
                    None => credit -= split.amount.value(),
                }
            }
            if debits.is_empty() {
                continue;
            }

            self.label_unknown(&mut labels, &payer, payer_ref.name());
            *sums.entry(payer).or_default() += credit;
            for (id, amount) in debits {
                *sums.entry(id).or_default() -= amount;
            }
        }

        Balances {
            values: sums
                .into_iter()
                .map(|(id, sum)| (id, Amount::new(settle_dust(sum))))
                .collect(),
            labels,
        }
    }

    fn label_unknown(
        &self,
        labels: &mut HashMap<MemberId, String>,
        id: &MemberId,
        name: Option<&str>,
    ) {
        if self.roster.contains(id) {
            return;
        }
        if let Some(name) = name {
            labels
                .entry(id.clone())
                .or_insert_with(|| name.trim().to_string());
        }
    }
}

/// Computes balances for a member list and a ledger.
pub fn aggregate<'e>(
    roster: &Roster,
    entries: impl IntoIterator<Item = &'e LedgerEntry>,
) -> Balances {
    BalanceAggregator::new(roster).aggregate(entries)
}

impl Group {
    /// Computes the balances of this group's members.
    pub fn balances(&self) -> Balances {
        aggregate(&self.roster(), &self.entries)
    }
}
