use crate::model::entry::LedgerEntry;
use crate::model::member::Member;
use crate::model::reference::Roster;
use serde::{Deserialize, Serialize};

/// A snapshot of one group: its members and its whole ledger.
///
/// This is both what the store loads before computing balances and the format of a standalone
/// ledger file:
///
/// ```json
/// {
///   "name": "Lisbon trip",
///   "members": [{ "id": "u1", "name": "Ana" }, { "id": "u2", "name": "Ben" }],
///   "entries": [
///     { "amount": 40, "category": "Food", "payer": "u1",
///       "splits": [{ "member": "u1", "amount": 20 }, { "member": "u2", "amount": 20 }] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub entries: Vec<LedgerEntry>,
}

impl Group {
    pub fn roster(&self) -> Roster {
        Roster::new(self.members.iter().cloned())
    }

    /// Entries that still count, i.e. those not soft-deleted.
    pub fn live_entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(|e| !e.deleted)
    }
}
