//! Repository addresses and stored-message keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::Message;

/// Where a store lives: `protocol://path`, e.g. `memory://var/mail/error`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryAddress {
    protocol: String,
    path: String,
}

impl RepositoryAddress {
    pub fn new(protocol: &str, path: &str) -> Result<Self, StoreError> {
        if protocol.is_empty() || path.is_empty() {
            return Err(StoreError::InvalidAddress(format!("{protocol}://{path}")));
        }
        Ok(Self {
            protocol: protocol.to_string(),
            path: path.to_string(),
        })
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let (protocol, path) = raw
            .split_once("://")
            .ok_or_else(|| StoreError::InvalidAddress(raw.to_string()))?;
        Self::new(protocol, path)
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for RepositoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.path)
    }
}

impl FromStr for RepositoryAddress {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepositoryAddress {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepositoryAddress> for String {
    fn from(value: RepositoryAddress) -> Self {
        value.to_string()
    }
}

/// Stable identity of a stored message, derived from the message id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MailKey(String);

impl MailKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn of(message: &Message) -> Self {
        Self(message.id().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MailKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
