//! Answers "is this member me?" for per-user views.
//!
//! A user can appear in a group under an account ID, or, before they registered, as a shadow member
//! that only carries their email, phone or name. `IdentitySet` holds every handle a user is known
//! by and is built once per request, then passed to whatever needs it.

use crate::model::member::{normalize_email, normalize_name, normalize_phone, Member, MemberId};
use crate::model::reference::{Reference, Roster};
use serde::{Deserialize, Serialize};

/// Which handle produced a match. Variants are listed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMatch {
    Id,
    Email,
    Phone,
    Name,
}

serde_plain::derive_display_from_serialize!(IdentityMatch);

/// The handles a single user is known by.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySet {
    id: Option<MemberId>,
    email: Option<String>,
    phone: Option<String>,
    name: Option<String>,
}

impl IdentitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: MemberId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(normalize_email(email)).filter(|s| !s.is_empty());
        self
    }

    /// Phones match exactly, ignoring whitespace. See `normalize_phone`.
    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = Some(normalize_phone(phone)).filter(|s| !s.is_empty());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(normalize_name(name)).filter(|s| !s.is_empty());
        self
    }

    /// Builds the identity of an existing member from every handle the member record carries.
    pub fn of_member(member: &Member) -> Self {
        let mut set = Self::new().with_id(member.id.clone()).with_name(&member.name);
        if let Some(email) = &member.email {
            set = set.with_email(email);
        }
        if let Some(phone) = &member.phone {
            set = set.with_phone(phone);
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.email.is_none() && self.phone.is_none() && self.name.is_none()
    }

    fn match_id(&self, id: &MemberId) -> bool {
        self.id.as_ref() == Some(id)
    }

    fn match_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(normalize_name(name).as_str())
    }

    /// Checks a member record against this identity: ID first, then email, phone and name.
    pub fn match_member(&self, member: &Member) -> Option<IdentityMatch> {
        if self.match_id(&member.id) {
            return Some(IdentityMatch::Id);
        }
        if let (Some(mine), Some(theirs)) = (&self.email, &member.email) {
            if *mine == normalize_email(theirs) {
                return Some(IdentityMatch::Email);
            }
        }
        if let (Some(mine), Some(theirs)) = (&self.phone, &member.phone) {
            if *mine == normalize_phone(theirs) {
                return Some(IdentityMatch::Phone);
            }
        }
        if self.match_name(&member.name) {
            return Some(IdentityMatch::Name);
        }
        None
    }

    /// Checks a payer or split reference against this identity.
    ///
    /// When the reference points at a roster member, the full member record is matched. Otherwise
    /// only the bare ID and then the denormalized names are available.
    pub fn match_reference(
        &self,
        reference: &Reference,
        fallback: Option<&str>,
        roster: &Roster,
    ) -> Option<IdentityMatch> {
        if let Some(member) = reference.id().and_then(|id| roster.get(id)) {
            return self.match_member(member);
        }
        if reference.id().is_some_and(|id| self.match_id(id)) {
            return Some(IdentityMatch::Id);
        }
        [reference.name(), fallback]
            .into_iter()
            .flatten()
            .any(|name| self.match_name(name))
            .then_some(IdentityMatch::Name)
    }

    /// All roster members that are this user.
    pub fn members_in<'a>(&self, roster: &'a Roster) -> Vec<&'a Member> {
        roster
            .members()
            .iter()
            .filter(|m| self.match_member(m).is_some())
            .collect()
    }
}
