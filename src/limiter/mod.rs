//! Sliding-window admission control.
//!
//! Each configured rule keeps, per scope key, a ring of counter buckets of
//! `precision` width covering the trailing `duration`. A call is admitted
//! only when every dimension of every applicable rule stays within its cap;
//! a single violation rejects the whole call and increments nothing.
//! Rejection is a normal control-flow outcome, not an error — callers route
//! the affected recipients to a configured stage.

mod window;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::error::ConfigError;
use crate::model::Address;

use window::Window;

// ── Rules ───────────────────────────────────────────────────────────

/// Which traffic partition a rule constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    Global,
    PerSender,
    PerRecipient,
}

/// The partition key for one admission call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Global,
    Sender(String),
    Recipient(String),
}

impl ScopeKey {
    pub fn scope(&self) -> RateLimitScope {
        match self {
            Self::Global => RateLimitScope::Global,
            Self::Sender(_) => RateLimitScope::PerSender,
            Self::Recipient(_) => RateLimitScope::PerRecipient,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Sender(s) => write!(f, "sender:{s}"),
            Self::Recipient(r) => write!(f, "recipient:{r}"),
        }
    }
}

/// A simultaneously-checked traffic dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Messages in the window.
    Count,
    /// Bytes of a single message.
    Size,
    /// Cumulative bytes in the window.
    TotalSize,
    /// Distinct recipients touched in the window.
    Recipients,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Count => "count",
            Self::Size => "size",
            Self::TotalSize => "total_size",
            Self::Recipients => "recipients",
        };
        write!(f, "{s}")
    }
}

/// A named admission rule: scope, window geometry, and dimension caps.
/// Dimensions left `None` are unconstrained.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    name: String,
    scope: RateLimitScope,
    duration: Duration,
    precision: Duration,
    count: Option<u64>,
    size: Option<u64>,
    total_size: Option<u64>,
    recipients: Option<u64>,
}

impl RateLimitRule {
    /// `precision` must be non-zero and divide `duration` evenly.
    pub fn new(
        name: impl Into<String>,
        scope: RateLimitScope,
        duration: Duration,
        precision: Duration,
    ) -> Result<Self, ConfigError> {
        if precision.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "precision".to_string(),
                message: "precision must be non-zero".to_string(),
            });
        }
        if duration.as_millis() % precision.as_millis() != 0 {
            return Err(ConfigError::InvalidValue {
                key: "precision".to_string(),
                message: format!(
                    "precision {precision:?} does not divide duration {duration:?} evenly"
                ),
            });
        }
        Ok(Self {
            name: name.into(),
            scope,
            duration,
            precision,
            count: None,
            size: None,
            total_size: None,
            recipients: None,
        })
    }

    pub fn count(mut self, cap: u64) -> Self {
        self.count = Some(cap);
        self
    }

    pub fn size(mut self, cap: u64) -> Self {
        self.size = Some(cap);
        self
    }

    pub fn total_size(mut self, cap: u64) -> Self {
        self.total_size = Some(cap);
        self
    }

    pub fn recipients(mut self, cap: u64) -> Self {
        self.recipients = Some(cap);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> RateLimitScope {
        self.scope
    }
}

// ── Admission ───────────────────────────────────────────────────────

/// Outcome of one admission call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The named rule's dimension would have been exceeded. Nothing was
    /// incremented.
    Rejected { rule: String, dimension: Dimension },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

// ── Limiter ─────────────────────────────────────────────────────────

/// Shared admission-control state for all configured rules.
///
/// The rule set is runtime-mutable: the administration surface adds and
/// removes rules while workers call in. One lock guards every window,
/// making the check-then-commit sequence atomic with respect to concurrent
/// callers sharing a scope key.
pub struct RateLimiter {
    rules: RwLock<Vec<RateLimitRule>>,
    epoch: Instant,
    windows: Mutex<HashMap<(String, ScopeKey), Window>>,
}

impl RateLimiter {
    pub fn new(rules: Vec<RateLimitRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            epoch: Instant::now(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// A limiter with no rules; every call is admitted.
    pub fn unlimited() -> Self {
        Self::new(Vec::new())
    }

    pub async fn rules(&self) -> Vec<RateLimitRule> {
        self.rules.read().await.clone()
    }

    /// Install a rule; replaces an existing rule with the same name.
    pub async fn add_rule(&self, rule: RateLimitRule) {
        let mut rules = self.rules.write().await;
        rules.retain(|existing| existing.name != rule.name);
        rules.push(rule);
    }

    /// Remove a rule and its accumulated windows; returns whether it
    /// existed.
    pub async fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|rule| rule.name != name);
        let removed = rules.len() != before;
        if removed {
            self.windows
                .lock()
                .await
                .retain(|(rule_name, _), _| rule_name != name);
        }
        removed
    }

    /// Check every rule matching the key's scope and, only if all pass,
    /// record the message against each of them (all-or-nothing).
    ///
    /// `recipients` should be the recipients this call is accounting for;
    /// the distinct-recipients dimension deduplicates against the window.
    pub async fn try_acquire(
        &self,
        key: &ScopeKey,
        message_size: u64,
        recipients: &[Address],
    ) -> Admission {
        let rules = self.rules.read().await;
        let applicable: Vec<&RateLimitRule> = rules
            .iter()
            .filter(|rule| rule.scope == key.scope())
            .collect();
        if applicable.is_empty() {
            return Admission::Admitted;
        }

        let elapsed = self.epoch.elapsed();
        let mut windows = self.windows.lock().await;

        for rule in &applicable {
            let window = windows
                .entry((rule.name.clone(), key.clone()))
                .or_insert_with(Window::new);
            window.evict(elapsed, rule);
            if let Some(dimension) = window.first_violation(rule, message_size, recipients) {
                debug!(rule = %rule.name, key = %key, %dimension, "Admission rejected");
                return Admission::Rejected {
                    rule: rule.name.clone(),
                    dimension,
                };
            }
        }

        for rule in &applicable {
            if let Some(window) = windows.get_mut(&(rule.name.clone(), key.clone())) {
                window.commit(elapsed, rule, message_size, recipients);
            }
        }
        Admission::Admitted
    }
}
