//! Composite role identifier `"<role>/<subID>"`.
//!
//! Parsing is strict: exactly one `/` with a non-empty role and sub-identifier
//! on either side. Strings with several separators are rejected rather than
//! split on the first one, so a key can never silently change meaning.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleKey {
    role: String,
    sub_id: String,
}

impl RoleKey {
    pub fn new(role: impl Into<String>, sub_id: impl Into<String>) -> Result<Self> {
        let role = role.into();
        let sub_id = sub_id.into();
        let input = || format!("{}{}{}", role, SEPARATOR, sub_id);
        if role.is_empty() {
            return Err(Error::role_parse(input(), "empty role name"));
        }
        if sub_id.is_empty() {
            return Err(Error::role_parse(input(), "empty sub-identifier"));
        }
        if role.contains(SEPARATOR) || sub_id.contains(SEPARATOR) {
            return Err(Error::role_parse(input(), "component contains '/'"));
        }
        Ok(Self { role, sub_id })
    }

    pub fn role(&self) -> &str { &self.role }
    pub fn sub_id(&self) -> &str { &self.sub_id }

    pub fn into_parts(self) -> (String, String) { (self.role, self.sub_id) }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.role, SEPARATOR, self.sub_id)
    }
}

impl FromStr for RoleKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(role), Some(sub), None) => RoleKey::new(role, sub),
            (_, None, _) => Err(Error::role_parse(s, "missing '/' separator")),
            _ => Err(Error::role_parse(s, "more than one '/' separator")),
        }
    }
}

impl Serialize for RoleKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoleKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Format `(role, subID)` into the composite string.
pub fn format_role_key(role: &str, sub_id: &str) -> Result<String> {
    RoleKey::new(role, sub_id).map(|k| k.to_string())
}

/// Split a composite string back into `(role, subID)`.
pub fn parse_role_key(s: &str) -> Result<(String, String)> {
    s.parse::<RoleKey>().map(RoleKey::into_parts)
}
