//! Builtin matchers.
//!
//! Only predicates derivable from the structured message fields live here —
//! the payload stays opaque. Front-ends that parsed MIME put extracted
//! attachment metadata into the `attachments` attribute, which is what the
//! attachment-name matcher reads.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::config::ComponentConfig;
use crate::error::ConfigError;
use crate::model::{Address, Message};

use super::super::registry::ComponentRegistry;
use super::super::{MatchResult, Matcher};

/// Well-known attribute carrying attachment metadata: an array whose
/// entries are either a file name string or an object with `name` and
/// optionally `zip_entries` (first-level names inside a zip attachment).
pub const ATTACHMENTS_ATTRIBUTE: &str = "attachments";

pub(super) fn register(registry: &mut ComponentRegistry) {
    registry.register_matcher("all", |_config| Ok(Arc::new(All)));
    registry.register_matcher("sender_is", |config| {
        Ok(Arc::new(SenderIs::from_config(config)?))
    });
    registry.register_matcher("sender_is_null", |_config| Ok(Arc::new(SenderIsNull)));
    registry.register_matcher("sender_matches", |config| {
        Ok(Arc::new(SenderMatches::from_config(config)?))
    });
    registry.register_matcher("recipient_is", |config| {
        Ok(Arc::new(RecipientIs::from_config(config)?))
    });
    registry.register_matcher("recipient_domain_is", |config| {
        Ok(Arc::new(RecipientDomainIs::from_config(config)?))
    });
    registry.register_matcher("size_greater_than", |config| {
        Ok(Arc::new(SizeGreaterThan::from_config(config)?))
    });
    registry.register_matcher("has_attribute", |config| {
        Ok(Arc::new(HasAttribute::from_config(config)?))
    });
    registry.register_matcher("attachment_filename_is", |config| {
        Ok(Arc::new(AttachmentFileNameIs::from_config(config)?))
    });
}

/// Comma/space-separated address list parameter.
fn address_list(config: &ComponentConfig, key: &str) -> Result<Vec<Address>, ConfigError> {
    split_list(config.require(key)?)
        .map(|raw| {
            Address::parse(raw).map_err(|err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: err.to_string(),
            })
        })
        .collect()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([',', ' '])
        .map(str::trim)
        .filter(|part| !part.is_empty())
}

// ── All ─────────────────────────────────────────────────────────────

/// Matches every recipient.
pub struct All;

impl Matcher for All {
    fn name(&self) -> &str {
        "all"
    }

    fn matches(&self, message: &Message) -> MatchResult {
        MatchResult::from_subset(message.recipients().to_vec())
    }
}

// ── Sender matchers ─────────────────────────────────────────────────

/// Matches all recipients when the sender is one of the configured
/// addresses.
pub struct SenderIs {
    senders: Vec<Address>,
}

impl SenderIs {
    pub fn new(senders: Vec<Address>) -> Self {
        Self { senders }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(address_list(config, "senders")?))
    }
}

impl Matcher for SenderIs {
    fn name(&self) -> &str {
        "sender_is"
    }

    fn matches(&self, message: &Message) -> MatchResult {
        match message.sender() {
            Some(sender) if self.senders.contains(sender) => {
                MatchResult::from_subset(message.recipients().to_vec())
            }
            _ => MatchResult::NoMatch,
        }
    }
}

/// Matches all recipients of null-sender (bounce/system) messages.
pub struct SenderIsNull;

impl Matcher for SenderIsNull {
    fn name(&self) -> &str {
        "sender_is_null"
    }

    fn matches(&self, message: &Message) -> MatchResult {
        if message.is_null_sender() {
            MatchResult::from_subset(message.recipients().to_vec())
        } else {
            MatchResult::NoMatch
        }
    }
}

/// Matches all recipients when the sender address matches the configured
/// regex.
pub struct SenderMatches {
    pattern: Regex,
}

impl SenderMatches {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        let raw = config.require("pattern")?;
        let pattern = Regex::new(raw).map_err(|err| ConfigError::InvalidValue {
            key: "pattern".to_string(),
            message: err.to_string(),
        })?;
        Ok(Self::new(pattern))
    }
}

impl Matcher for SenderMatches {
    fn name(&self) -> &str {
        "sender_matches"
    }

    fn matches(&self, message: &Message) -> MatchResult {
        match message.sender() {
            Some(sender) if self.pattern.is_match(&sender.to_string()) => {
                MatchResult::from_subset(message.recipients().to_vec())
            }
            _ => MatchResult::NoMatch,
        }
    }
}

// ── Recipient matchers ──────────────────────────────────────────────

/// Selects the recipients present in the configured list.
pub struct RecipientIs {
    recipients: Vec<Address>,
}

impl RecipientIs {
    pub fn new(recipients: Vec<Address>) -> Self {
        Self { recipients }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(address_list(config, "recipients")?))
    }
}

impl Matcher for RecipientIs {
    fn name(&self) -> &str {
        "recipient_is"
    }

    fn matches(&self, message: &Message) -> MatchResult {
        MatchResult::from_subset(
            message
                .recipients()
                .iter()
                .filter(|r| self.recipients.contains(r))
                .cloned()
                .collect(),
        )
    }
}

/// Selects the recipients whose domain is in the configured list.
pub struct RecipientDomainIs {
    domains: Vec<String>,
}

impl RecipientDomainIs {
    pub fn new(domains: impl IntoIterator<Item = String>) -> Self {
        Self {
            domains: domains.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            split_list(config.require("domains")?).map(String::from),
        ))
    }
}

impl Matcher for RecipientDomainIs {
    fn name(&self) -> &str {
        "recipient_domain_is"
    }

    fn matches(&self, message: &Message) -> MatchResult {
        MatchResult::from_subset(
            message
                .recipients()
                .iter()
                .filter(|r| self.domains.iter().any(|d| r.domain() == d))
                .cloned()
                .collect(),
        )
    }
}

// ── Size and attribute matchers ─────────────────────────────────────

/// Matches all recipients when the declared payload size exceeds the
/// configured threshold (`size` accepts `1k`/`1m` literals).
pub struct SizeGreaterThan {
    bytes: u64,
}

impl SizeGreaterThan {
    pub fn new(bytes: u64) -> Self {
        Self { bytes }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        let bytes = config
            .get_size("size")?
            .ok_or_else(|| ConfigError::MissingParameter {
                component: "size_greater_than".to_string(),
                key: "size".to_string(),
            })?;
        Ok(Self::new(bytes))
    }
}

impl Matcher for SizeGreaterThan {
    fn name(&self) -> &str {
        "size_greater_than"
    }

    fn matches(&self, message: &Message) -> MatchResult {
        if message.size() > self.bytes {
            MatchResult::from_subset(message.recipients().to_vec())
        } else {
            MatchResult::NoMatch
        }
    }
}

/// Matches all recipients when the named attribute is present.
pub struct HasAttribute {
    attribute: String,
}

impl HasAttribute {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.require("name")?))
    }
}

impl Matcher for HasAttribute {
    fn name(&self) -> &str {
        "has_attribute"
    }

    fn matches(&self, message: &Message) -> MatchResult {
        if message.attribute(&self.attribute).is_some() {
            MatchResult::from_subset(message.recipients().to_vec())
        } else {
            MatchResult::NoMatch
        }
    }
}

// ── Attachment name matcher ─────────────────────────────────────────

/// One comparison pattern: case-insensitive, with `*`-prefix wildcarding
/// (`*.exe` matches any name ending in `.exe`).
#[derive(Debug, Clone, PartialEq, Eq)]
enum NamePattern {
    Exact(String),
    Suffix(String),
}

impl NamePattern {
    fn parse(raw: &str) -> Self {
        let raw = raw.to_lowercase();
        match raw.strip_prefix('*') {
            Some(suffix) => Self::Suffix(suffix.to_string()),
            None => Self::Exact(raw),
        }
    }

    fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        match self {
            Self::Exact(exact) => name == *exact,
            Self::Suffix(suffix) => name.ends_with(suffix),
        }
    }
}

/// Matches all recipients when any attachment file name matches one of the
/// configured patterns (comma/space-separated alternatives). With
/// `inspect_zip`, the first-level entry names of zip attachments are
/// checked too — no recursive unzip.
pub struct AttachmentFileNameIs {
    patterns: Vec<NamePattern>,
    inspect_zip: bool,
}

impl AttachmentFileNameIs {
    pub fn new(patterns: &str, inspect_zip: bool) -> Self {
        Self {
            patterns: split_list(patterns).map(NamePattern::parse).collect(),
            inspect_zip,
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.require("patterns")?,
            config.get_bool("inspect_zip", false)?,
        ))
    }

    fn any_pattern_matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(name))
    }

    fn entry_matches(&self, entry: &Value) -> bool {
        match entry {
            Value::String(name) => self.any_pattern_matches(name),
            Value::Object(fields) => {
                if let Some(name) = fields.get("name").and_then(Value::as_str)
                    && self.any_pattern_matches(name)
                {
                    return true;
                }
                if self.inspect_zip
                    && let Some(entries) = fields.get("zip_entries").and_then(Value::as_array)
                {
                    return entries
                        .iter()
                        .filter_map(Value::as_str)
                        .any(|name| self.any_pattern_matches(name));
                }
                false
            }
            _ => false,
        }
    }
}

impl Matcher for AttachmentFileNameIs {
    fn name(&self) -> &str {
        "attachment_filename_is"
    }

    fn matches(&self, message: &Message) -> MatchResult {
        let Some(Value::Array(attachments)) = message.attribute(ATTACHMENTS_ATTRIBUTE) else {
            return MatchResult::NoMatch;
        };
        if attachments.iter().any(|entry| self.entry_matches(entry)) {
            MatchResult::from_subset(message.recipients().to_vec())
        } else {
            MatchResult::NoMatch
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn mail() -> Message {
        Message::builder()
            .id("m1")
            .sender(addr("sender@example.com"))
            .recipients([addr("a@d.com"), addr("b@other.org")])
            .body("hello")
            .build()
    }

    #[test]
    fn all_selects_every_recipient() {
        assert_eq!(
            All.matches(&mail()),
            MatchResult::Matched(vec![addr("a@d.com"), addr("b@other.org")])
        );
    }

    #[test]
    fn sender_is_matches_whole_message() {
        let matcher = SenderIs::new(vec![addr("sender@example.com")]);
        assert!(matcher.matches(&mail()).is_match());

        let other = SenderIs::new(vec![addr("nobody@example.com")]);
        assert_eq!(other.matches(&mail()), MatchResult::NoMatch);
    }

    #[test]
    fn sender_is_null_only_matches_bounces() {
        let bounce = Message::builder().recipient(addr("a@d.com")).build();
        assert!(SenderIsNull.matches(&bounce).is_match());
        assert_eq!(SenderIsNull.matches(&mail()), MatchResult::NoMatch);
    }

    #[test]
    fn sender_matches_uses_regex() {
        let matcher = SenderMatches::new(Regex::new(r"(?i)^no[\-_.]?reply@").unwrap());
        let noreply = Message::builder()
            .sender(addr("no-reply@shop.example"))
            .recipient(addr("a@d.com"))
            .build();
        assert!(matcher.matches(&noreply).is_match());
        assert_eq!(matcher.matches(&mail()), MatchResult::NoMatch);
    }

    #[test]
    fn recipient_is_selects_subset() {
        let matcher = RecipientIs::new(vec![addr("b@other.org"), addr("c@nowhere.net")]);
        assert_eq!(
            matcher.matches(&mail()),
            MatchResult::Matched(vec![addr("b@other.org")])
        );
    }

    #[test]
    fn recipient_domain_selects_subset() {
        let matcher = RecipientDomainIs::new(["Other.ORG".to_string()]);
        assert_eq!(
            matcher.matches(&mail()),
            MatchResult::Matched(vec![addr("b@other.org")])
        );
    }

    #[test]
    fn size_greater_than_uses_declared_size() {
        let matcher = SizeGreaterThan::new(3);
        assert!(matcher.matches(&mail()).is_match());
        let matcher = SizeGreaterThan::new(1024);
        assert_eq!(matcher.matches(&mail()), MatchResult::NoMatch);
    }

    #[test]
    fn has_attribute_checks_presence() {
        let mut message = mail();
        message.set_attribute("spam.flag", true);
        assert!(HasAttribute::new("spam.flag").matches(&message).is_match());
        assert_eq!(
            HasAttribute::new("other").matches(&message),
            MatchResult::NoMatch
        );
    }

    #[test]
    fn attachment_patterns_are_case_insensitive_with_wildcards() {
        let matcher = AttachmentFileNameIs::new("*.EXE, readme.txt", false);

        let mut message = mail();
        message.set_attribute(ATTACHMENTS_ATTRIBUTE, json!(["Invoice.exe"]));
        assert!(matcher.matches(&message).is_match());

        message.set_attribute(ATTACHMENTS_ATTRIBUTE, json!(["README.TXT"]));
        assert!(matcher.matches(&message).is_match());

        message.set_attribute(ATTACHMENTS_ATTRIBUTE, json!(["notes.pdf"]));
        assert_eq!(matcher.matches(&message), MatchResult::NoMatch);
    }

    #[test]
    fn attachment_matcher_without_attribute_never_matches() {
        let matcher = AttachmentFileNameIs::new("*.exe", false);
        assert_eq!(matcher.matches(&mail()), MatchResult::NoMatch);
    }

    #[test]
    fn zip_entries_only_checked_when_enabled() {
        let attachment = json!([{ "name": "bundle.zip", "zip_entries": ["payload.exe"] }]);

        let mut message = mail();
        message.set_attribute(ATTACHMENTS_ATTRIBUTE, attachment);

        let without = AttachmentFileNameIs::new("*.exe", false);
        assert_eq!(without.matches(&message), MatchResult::NoMatch);

        let with = AttachmentFileNameIs::new("*.exe", true);
        assert!(with.matches(&message).is_match());
    }

    #[test]
    fn from_config_rejects_bad_parameters() {
        let missing = ComponentConfig::new("sender_is");
        assert!(SenderIs::from_config(&missing).is_err());

        let bad_address = ComponentConfig::new("sender_is").param("senders", "not-an-address");
        assert!(SenderIs::from_config(&bad_address).is_err());

        let bad_regex = ComponentConfig::new("sender_matches").param("pattern", "(unclosed");
        assert!(SenderMatches::from_config(&bad_regex).is_err());

        let bad_size = ComponentConfig::new("size_greater_than").param("size", "huge");
        assert!(SizeGreaterThan::from_config(&bad_size).is_err());
    }

    #[test]
    fn address_lists_split_on_commas_and_spaces() {
        let config = ComponentConfig::new("recipient_is")
            .param("recipients", "a@d.com, b@d.com c@d.com");
        let matcher = RecipientIs::from_config(&config).unwrap();
        assert_eq!(matcher.recipients.len(), 3);
    }
}
