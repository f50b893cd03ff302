use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The string prefix that marks a shadow identifier on the wire and in the database.
pub const SHADOW_PREFIX: &str = "shadow:";

/// Number of hex characters kept from the contact hash.
const SHADOW_HEX_LEN: usize = 16;

/// Identifies a member of a group.
///
/// People with a registered account are identified by that account's ID. People without one get
/// a deterministic shadow ID derived from their contact info, which is rewritten to a real account
/// ID when they register. The two kinds never compare equal, even when the inner strings match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemberId {
    Account(String),
    Shadow(String),
}

impl MemberId {
    pub fn account(id: impl Into<String>) -> Self {
        MemberId::Account(id.into())
    }

    /// Derives a shadow ID from contact info. Email wins over phone, phone wins over name.
    ///
    /// ```
    /// # use settle_up::model::MemberId;
    /// let a = MemberId::shadow(Some(" Ana@Example.com "), None, "Ana");
    /// let b = MemberId::shadow(Some("ana@example.com"), Some("555"), "Someone Else");
    /// assert_eq!(a, b);
    /// assert!(a.is_shadow());
    /// ```
    pub fn shadow(email: Option<&str>, phone: Option<&str>, name: &str) -> Self {
        let key = contact_key(email, phone, name);
        let digest = Sha256::digest(key.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        MemberId::Shadow(hex[..SHADOW_HEX_LEN].to_string())
    }

    /// Derives the shadow ID for someone known only by name.
    pub fn shadow_from_name(name: &str) -> Self {
        Self::shadow(None, None, name)
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self, MemberId::Shadow(_))
    }

    pub fn is_account(&self) -> bool {
        matches!(self, MemberId::Account(_))
    }
}

/// The normalized contact string a shadow ID is hashed from.
fn contact_key(email: Option<&str>, phone: Option<&str>, name: &str) -> String {
    if let Some(email) = email.map(normalize_email).filter(|e| !e.is_empty()) {
        return format!("email:{email}");
    }
    if let Some(phone) = phone.map(normalize_phone).filter(|p| !p.is_empty()) {
        return format!("phone:{phone}");
    }
    format!("name:{}", normalize_name(name))
}

/// Emails compare case-insensitively with surrounding whitespace ignored.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The stored form of a phone number: the string exactly as given with all whitespace removed.
///
/// This widens exact matching on purpose so that `+1 555 0100` and `+15550100` are the same
/// person. Nothing else is normalized, so `+1-555-0100` is a different number.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Names compare case-insensitively with surrounding whitespace ignored.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Display for MemberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberId::Account(id) => write!(f, "{id}"),
            MemberId::Shadow(hash) => write!(f, "{SHADOW_PREFIX}{hash}"),
        }
    }
}

/// The error returned when an empty string is parsed as a `MemberId`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a member id cannot be empty")]
pub struct EmptyMemberId;

impl FromStr for MemberId {
    type Err = EmptyMemberId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix(SHADOW_PREFIX) {
            Some(hash) if !hash.is_empty() => Ok(MemberId::Shadow(hash.to_string())),
            Some(_) => Err(EmptyMemberId),
            None if s.is_empty() => Err(EmptyMemberId),
            None => Ok(MemberId::Account(s.to_string())),
        }
    }
}

impl Serialize for MemberId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MemberId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MemberId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for MemberId {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "MemberId".into()
    }

    fn json_schema(generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        String::json_schema(generator)
    }
}

/// A participant in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Member {
    /// Creates a member with a registered account ID.
    pub fn with_account(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: MemberId::account(id),
            name: name.into(),
            email: None,
            phone: None,
        }
    }

    /// Creates a member without an account. The ID is the shadow ID derived from the contact info.
    pub fn shadow(name: impl Into<String>, email: Option<String>, phone: Option<String>) -> Self {
        let name = name.into();
        let id = MemberId::shadow(email.as_deref(), phone.as_deref(), &name);
        Self {
            id,
            name,
            email,
            phone,
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }
}
