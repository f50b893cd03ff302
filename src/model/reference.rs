//! References from ledger entries to members.
//!
//! A payer or split member arrives in one of three shapes: a bare ID string, a populated record
//! `{ "id": ..., "name": ... }`, or nothing at all (a stale or deleted reference), in which case
//! the entry may still carry a denormalized name. `Reference` captures those shapes and `Roster`
//! turns them into a canonical `MemberId`.

use crate::model::member::{normalize_name, Member, MemberId};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Formatter;
use std::str::FromStr;

/// The display name used when nothing better is known.
pub const UNKNOWN_NAME: &str = "Unknown";

/// A possibly-unresolved pointer to a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Id(MemberId),
    Populated { id: MemberId, name: String },
    Unresolved { fallback_name: Option<String> },
}

impl Reference {
    /// A reference with no usable ID.
    pub fn unresolved() -> Self {
        Reference::Unresolved {
            fallback_name: None,
        }
    }

    pub fn id(&self) -> Option<&MemberId> {
        match self {
            Reference::Id(id) | Reference::Populated { id, .. } => Some(id),
            Reference::Unresolved { .. } => None,
        }
    }

    /// The name carried by the reference itself, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Reference::Id(_) => None,
            Reference::Populated { name, .. } => Some(name.as_str()),
            Reference::Unresolved { fallback_name } => fallback_name.as_deref(),
        }
    }

    /// Builds the canonical reference from the raw reference and an entry's denormalized name.
    ///
    /// A missing reference with a fallback name becomes `Unresolved` carrying that name.
    pub fn normalize(raw: Option<&Reference>, fallback: Option<&str>) -> Reference {
        let fallback = fallback.map(str::trim).filter(|s| !s.is_empty());
        match raw {
            Some(Reference::Unresolved { fallback_name }) => Reference::Unresolved {
                fallback_name: fallback_name.clone().or(fallback.map(str::to_string)),
            },
            Some(r) => r.clone(),
            None => Reference::Unresolved {
                fallback_name: fallback.map(str::to_string),
            },
        }
    }
}

impl From<MemberId> for Reference {
    fn from(id: MemberId) -> Self {
        Reference::Id(id)
    }
}

impl From<&Member> for Reference {
    fn from(member: &Member) -> Self {
        Reference::Populated {
            id: member.id.clone(),
            name: member.name.clone(),
        }
    }
}

impl Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            Reference::Id(id) => serializer.collect_str(id),
            Reference::Populated { id, name } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("id", id)?;
                map.serialize_entry("name", name)?;
                map.end()
            }
            Reference::Unresolved { .. } => serializer.serialize_none(),
        }
    }
}

struct ReferenceVisitor;

impl<'de> Visitor<'de> for ReferenceVisitor {
    type Value = Reference;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("a member id string, an object with an id, or null")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(match MemberId::from_str(v) {
            Ok(id) => Reference::Id(id),
            Err(_) => Reference::unresolved(),
        })
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Reference::unresolved())
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Reference::unresolved())
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(ReferenceVisitor)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut id: Option<String> = None;
        let mut name: Option<String> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "id" | "_id" => id = map.next_value::<Option<String>>()?,
                "name" => name = map.next_value::<Option<String>>()?,
                _ => {
                    let _ = map.next_value::<de::IgnoredAny>()?;
                }
            }
        }
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        Ok(match (id.as_deref().map(MemberId::from_str), name) {
            (Some(Ok(id)), Some(name)) => Reference::Populated { id, name },
            (Some(Ok(id)), None) => Reference::Id(id),
            (_, fallback_name) => Reference::Unresolved { fallback_name },
        })
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ReferenceVisitor)
    }
}

/// The member list of a group, indexed for reference resolution.
///
/// Member order is preserved because it decides tie-breaks in the settlement simplifier. If the
/// same ID is listed twice, the first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    members: Vec<Member>,
    by_id: HashMap<MemberId, usize>,
    by_name: HashMap<String, usize>,
}

impl Roster {
    pub fn new(members: impl IntoIterator<Item = Member>) -> Self {
        let mut roster = Roster::default();
        for member in members {
            if roster.by_id.contains_key(&member.id) {
                continue;
            }
            let ix = roster.members.len();
            roster.by_id.insert(member.id.clone(), ix);
            roster
                .by_name
                .entry(normalize_name(&member.name))
                .or_insert(ix);
            roster.members.push(member);
        }
        roster
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, id: &MemberId) -> Option<&Member> {
        self.by_id.get(id).map(|&ix| &self.members[ix])
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Finds a member by case-insensitive, trimmed name.
    pub fn find_by_name(&self, name: &str) -> Option<&Member> {
        self.by_name
            .get(&normalize_name(name))
            .map(|&ix| &self.members[ix])
    }

    /// Resolves a reference to a canonical member ID.
    ///
    /// Known IDs win. Otherwise the populated name, then the entry's fallback name, is looked up
    /// among the members. An unknown ID is kept as is so the amount is still attributed to someone.
    /// A bare name with no matching member maps to the shadow ID of that name. Returns `None` only
    /// when the reference carries neither an ID nor a name.
    pub fn resolve(&self, reference: &Reference, fallback: Option<&str>) -> Option<MemberId> {
        if let Some(id) = reference.id() {
            if self.contains(id) {
                return Some(id.clone());
            }
        }

        let names = [reference.name(), fallback];
        let mut names = names
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let first_name = names.clone().next();
        if let Some(member) = names.find_map(|n| self.find_by_name(n)) {
            return Some(member.id.clone());
        }

        if let Some(id) = reference.id() {
            return Some(id.clone());
        }
        first_name.map(MemberId::shadow_from_name)
    }

    /// Resolves the name to show for a reference: the member's name, then the populated name, then
    /// the fallback, then `"Unknown"`.
    pub fn display_name(&self, reference: &Reference, fallback: Option<&str>) -> String {
        reference
            .id()
            .and_then(|id| self.get(id))
            .map(|m| m.name.clone())
            .or_else(|| reference.name().map(str::to_string))
            .or_else(|| {
                fallback
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }
}
