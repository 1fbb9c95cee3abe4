//! Matcher contract.

use crate::model::{Address, Message};

/// Result of evaluating a matcher against a message.
///
/// `NoMatch` means the matcher ran and selected nobody — distinct from
/// "never evaluated", which the driver does not report. An explicit empty
/// `Matched` subset is treated the same as `NoMatch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Matched(Vec<Address>),
    NoMatch,
}

impl MatchResult {
    /// Wrap a recipient subset, normalizing empty to `NoMatch`.
    pub fn from_subset(recipients: Vec<Address>) -> Self {
        if recipients.is_empty() {
            Self::NoMatch
        } else {
            Self::Matched(recipients)
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(recipients) if !recipients.is_empty())
    }
}

/// A pure predicate selecting a subset of a message's recipients.
///
/// Matchers must not mutate anything; all side effects belong to the paired
/// [`super::Action`]. Content predicates beyond the structured message
/// fields are plugged in through this trait by the embedding process.
pub trait Matcher: Send + Sync {
    /// The registry name this matcher was built under.
    fn name(&self) -> &str;

    fn matches(&self, message: &Message) -> MatchResult;
}
