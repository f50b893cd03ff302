//! The settlement engine: group balances and the payments that clear them.
//!
//! Everything in here is a pure function over data the caller has already loaded. Nothing logs,
//! touches the filesystem or the database.

mod analytics;
mod balance;
mod simplify;
mod summary;

pub use analytics::{consumption_by_member, spending_by_category, total_spend};
pub use balance::{aggregate, BalanceAggregator, Balances};
pub use simplify::{simplify, verify, MemberView, SettlementSuggestion};
pub use summary::{summarize, UserSummary};

use crate::model::{Amount, MemberId};

/// Errors from the pure settlement layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettleError {
    /// A balance map could not be read from its raw form.
    #[error("malformed balances: {0}")]
    MalformedBalances(String),

    /// Applying the suggestions does not reproduce a member's balance.
    #[error("settlements for {member} add up to {actual} but the balance is {expected}")]
    SettlementMismatch {
        member: MemberId,
        expected: Amount,
        actual: Amount,
    },

    /// A suggestion has a creditor paying or a debtor being paid.
    #[error("a suggested payment runs the wrong way for {0}")]
    WrongDirection(MemberId),
}
