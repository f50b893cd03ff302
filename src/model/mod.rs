//! Types that represent the core data model, such as `Member`, `LedgerEntry` and `Amount`.
mod amount;
mod entry;
mod group;
mod identity;
mod member;
mod reference;

pub use amount::{round2, settle_dust, Amount, AmountError, EPSILON, SPLIT_TOLERANCE};
pub use entry::{
    is_settlement_category, split_equally, EntryError, LedgerEntry, NewEntry, Split,
    DEFAULT_CATEGORY, SETTLEMENT_CATEGORY,
};
pub use group::Group;
pub use identity::{IdentityMatch, IdentitySet};
pub use member::{
    normalize_email, normalize_name, normalize_phone, EmptyMemberId, Member, MemberId,
    SHADOW_PREFIX,
};
pub use reference::{Reference, Roster, UNKNOWN_NAME};
