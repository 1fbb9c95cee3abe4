//! Mail address handling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// A normalized `local@domain` mail address.
///
/// Both parts are lowercased on construction so table lookups and rate-limit
/// scope keys are case-insensitive. Serializes as the plain string form so
/// addresses can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    local: String,
    domain: String,
}

impl Address {
    /// Build an address from already-split parts.
    pub fn new(local: &str, domain: &str) -> Result<Self, AddressError> {
        if local.is_empty() || domain.is_empty() {
            return Err(AddressError::EmptyPart(format!("{local}@{domain}")));
        }
        Ok(Self {
            local: local.to_lowercase(),
            domain: domain.to_lowercase(),
        })
    }

    /// Parse a `local@domain` string.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let (local, domain) = raw
            .rsplit_once('@')
            .ok_or_else(|| AddressError::MissingSeparator(raw.to_string()))?;
        Self::new(local, domain)
    }

    /// The part before the `@`.
    pub fn local_part(&self) -> &str {
        &self.local
    }

    /// The part after the `@`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The same local part relocated to another domain (domain aliasing).
    pub fn with_domain(&self, domain: &str) -> Result<Self, AddressError> {
        Self::new(&self.local, domain)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}
