use crate::model::{Amount, Group, IdentityMatch, IdentitySet, MemberId};
use crate::settle::{simplify, MemberView, SettlementSuggestion};
use serde::Serialize;

/// One user's view of a group: where they stand and which payments concern them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    /// The group members that are this user. Usually one, but a user who was added both as a
    /// shadow member and under their account shows up twice until the shadow is linked.
    pub members: Vec<MemberView>,
    /// How the first matching member was recognized.
    pub matched_by: IdentityMatch,
    /// The user's combined balance. Positive means they are owed money.
    pub balance: Amount,
    /// What the user paid for the group, settlements excluded.
    pub paid: Amount,
    /// The user's share of the group's spending, settlements excluded.
    pub share: Amount,
    /// Suggested payments the user should make.
    pub you_owe: Vec<SettlementSuggestion>,
    /// Suggested payments the user should receive.
    pub owed_to_you: Vec<SettlementSuggestion>,
}

/// Summarizes a group from the point of view of `identity`. Returns `None` when the identity does
/// not match any member of the group.
pub fn summarize(identity: &IdentitySet, group: &Group) -> Option<UserSummary> {
    let roster = group.roster();
    let mut matched_by = None;
    let mut mine: Vec<MemberId> = Vec::new();
    let mut members = Vec::new();
    for member in roster.members() {
        if let Some(how) = identity.match_member(member) {
            matched_by.get_or_insert(how);
            mine.push(member.id.clone());
            members.push(MemberView::from(member));
        }
    }
    let matched_by = matched_by?;

    let balances = group.balances();
    let balance = mine.iter().map(|id| balances.get(id)).sum();

    let mut paid = Amount::ZERO;
    let mut share = Amount::ZERO;
    for entry in group.live_entries().filter(|e| !e.is_settlement()) {
        if identity
            .match_reference(&entry.payer(), None, &roster)
            .is_some()
        {
            paid += entry.amount;
        }
        for split in &entry.splits {
            if identity
                .match_reference(&split.reference(), None, &roster)
                .is_some()
            {
                share += split.amount;
            }
        }
    }

    let (mut you_owe, mut owed_to_you) = (Vec::new(), Vec::new());
    for suggestion in simplify(&balances, &roster) {
        if mine.contains(&suggestion.from.id) {
            you_owe.push(suggestion);
        } else if mine.contains(&suggestion.to.id) {
            owed_to_you.push(suggestion);
        }
    }

    Some(UserSummary {
        members,
        matched_by,
        balance,
        paid,
        share,
        you_owe,
        owed_to_you,
    })
}
