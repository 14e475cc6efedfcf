use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Free-form key/value data attached to a user record.
pub type UserData = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// RESPONSE TYPES - Backend-owned records, never mutated locally
// =============================================================================

/// A user record as returned by the identity API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend-assigned unique identifier
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub first_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    /// Country code chosen by the user, empty when unknown
    #[serde(default, deserialize_with = "null_as_default")]
    pub country: String,
    /// Account status (e.g. "active", "disabled"); not sent by every deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Arbitrary application data stored alongside the user
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: UserData,
    /// Creation time of the record; not sent by every deployment. Values
    /// that are not RFC 3339 timestamps decode as `None`.
    #[serde(
        default,
        serialize_with = "time::serde::rfc3339::option::serialize",
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
    /// Fields not covered above
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Identity {
    /// "First Last", falling back to the username when both names are blank.
    #[must_use]
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

/// Response body of a successful login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthOutput {
    /// The authenticated user
    pub user: Identity,
    /// Permission name -> granted
    #[serde(default, deserialize_with = "null_as_default")]
    pub permissions: HashMap<String, bool>,
}

impl AuthOutput {
    /// Whether `permission` is present and granted.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.get(permission).copied().unwrap_or(false)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(raw)) => Ok(OffsetDateTime::parse(&raw, &Rfc3339).ok()),
        _ => Ok(None),
    }
}

// =============================================================================
// REQUEST TYPES
// =============================================================================

/// Presence of a single field in a partial update.
///
/// `Unchanged` fields are left out of the request body entirely, `Clear`
/// is sent as JSON `null` and `Set` carries the new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Unchanged,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// The value being set, if any.
    pub const fn as_set(&self) -> Option<&T> {
        match self {
            Self::Set(value) => Some(value),
            Self::Unchanged | Self::Clear => None,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `None` clears the field, `Some` sets it.
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Clear, Self::Set)
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Only reached when a field forgets `skip_serializing_if`.
            Self::Unchanged | Self::Clear => serializer.serialize_none(),
            Self::Set(value) => value.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Self::from)
    }
}

/// Parameters for creating a user. Fields left as `None` are omitted.
#[must_use]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<UserData>,
}

impl CreateUser {
    /// Creates an empty request
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }

    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_data(mut self, data: UserData) -> Self {
        self.data = Some(data);
        self
    }
}

/// Parameters for a partial user update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateUser {
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub first_name: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub last_name: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub username: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub email: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub password: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub data: Patch<UserData>,
}

impl UpdateUser {
    /// Creates an update that changes nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every field is `Unchanged`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.first_name.is_unchanged()
            && self.last_name.is_unchanged()
            && self.username.is_unchanged()
            && self.email.is_unchanged()
            && self.password.is_unchanged()
            && self.data.is_unchanged()
    }

    #[must_use]
    pub fn set_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Patch::Set(first_name.into());
        self
    }

    #[must_use]
    pub fn set_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Patch::Set(last_name.into());
        self
    }

    #[must_use]
    pub fn set_username(mut self, username: impl Into<String>) -> Self {
        self.username = Patch::Set(username.into());
        self
    }

    #[must_use]
    pub fn set_email(mut self, email: impl Into<String>) -> Self {
        self.email = Patch::Set(email.into());
        self
    }

    #[must_use]
    pub fn set_password(mut self, password: impl Into<String>) -> Self {
        self.password = Patch::Set(password.into());
        self
    }

    #[must_use]
    pub fn set_data(mut self, data: UserData) -> Self {
        self.data = Patch::Set(data);
        self
    }

    #[must_use]
    pub fn clear_first_name(mut self) -> Self {
        self.first_name = Patch::Clear;
        self
    }

    #[must_use]
    pub fn clear_last_name(mut self) -> Self {
        self.last_name = Patch::Clear;
        self
    }

    #[must_use]
    pub fn clear_data(mut self) -> Self {
        self.data = Patch::Clear;
        self
    }
}

/// Body of `POST v1/auth`. Exactly one of `email`/`username` is set.
#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub account_uuid: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
}

/// Body of `POST v1/account/{account}/token`.
#[derive(Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub api_key: &'a str,
}
