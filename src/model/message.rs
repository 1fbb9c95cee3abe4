//! The message flowing through the pipeline.
//!
//! A plain struct with an explicit builder — matchers and actions are the
//! polymorphic seams, the message itself is not. The payload is opaque
//! bytes: this core never parses MIME, front-ends put anything structured
//! they extracted (subject, attachment names, …) into `attributes`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::Address;

// ── Supporting types ────────────────────────────────────────────────

/// A single header line queued for one recipient, distinct from anything in
/// the payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Opaque message body: bytes plus the size declared at intake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    bytes: Vec<u8>,
    declared_size: u64,
}

impl Payload {
    /// Payload whose declared size is the byte length.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let declared_size = bytes.len() as u64;
        Self {
            bytes,
            declared_size,
        }
    }

    /// Payload with an explicitly declared size (e.g. the SMTP SIZE value
    /// when the body is spooled elsewhere).
    pub fn with_declared_size(bytes: impl Into<Vec<u8>>, declared_size: u64) -> Self {
        Self {
            bytes: bytes.into(),
            declared_size,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.declared_size
    }
}

/// Terminal outcome for one recipient, surfaced to the front-end boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    /// Handed to delivery.
    Delivered,
    /// Parked in the named repository.
    Stored { repository: String },
    /// Consumed without delivery.
    Dropped,
    /// Ended in the error stage.
    Errored { reason: String },
}

/// A recipient paired with its terminal disposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientDisposition {
    pub recipient: Address,
    pub disposition: Disposition,
}

// ── Message ─────────────────────────────────────────────────────────

/// A message in flight through the pipeline.
///
/// Owned exclusively by the worker driving it — no locking at this level.
/// Recipients form an ordered, duplicate-free set. `state` names the stage
/// the message currently sits in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: String,
    /// `None` is the distinguished null sender (bounces, system mail).
    sender: Option<Address>,
    recipients: Vec<Address>,
    attributes: BTreeMap<String, Value>,
    /// Header additions queued per recipient, applied at delivery time.
    recipient_headers: BTreeMap<Address, Vec<Header>>,
    payload: Payload,
    state: String,
    last_updated: DateTime<Utc>,
    error_message: Option<String>,
    /// Forks produced by subset diversion, drained by the pipeline driver.
    #[serde(skip, default)]
    forks: Vec<Message>,
    /// Terminal outcomes recorded by actions, drained by the driver.
    #[serde(skip, default)]
    dispositions: Vec<RecipientDisposition>,
}

impl Message {
    /// The stage every message enters the pipeline in.
    pub const DEFAULT: &'static str = "root";
    /// The stage failed recipients are diverted to.
    pub const ERROR: &'static str = "error";

    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    pub fn is_null_sender(&self) -> bool {
        self.sender.is_none()
    }

    /// Sender as a rate-limit scope key; the null sender maps to `<>`.
    pub fn sender_key(&self) -> String {
        match &self.sender {
            Some(addr) => addr.to_string(),
            None => "<>".to_string(),
        }
    }

    pub fn set_sender(&mut self, sender: Address) {
        self.sender = Some(sender);
        self.touch();
    }

    pub fn set_null_sender(&mut self) {
        self.sender = None;
        self.touch();
    }

    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    pub fn contains_recipient(&self, recipient: &Address) -> bool {
        self.recipients.contains(recipient)
    }

    /// Append a recipient, keeping the set duplicate-free.
    /// Returns false when the recipient was already present.
    pub fn add_recipient(&mut self, recipient: Address) -> bool {
        if self.recipients.contains(&recipient) {
            return false;
        }
        self.recipients.push(recipient);
        self.touch();
        true
    }

    pub fn remove_recipients(&mut self, subset: &[Address]) {
        self.recipients.retain(|r| !subset.contains(r));
        self.touch();
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
        self.touch();
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn size(&self) -> u64 {
        self.payload.size()
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Set an attribute, returning the previous value if any.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.touch();
        self.attributes.insert(name.into(), value.into())
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.touch();
        self.attributes.remove(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn add_recipient_header(&mut self, recipient: &Address, header: Header) {
        self.recipient_headers
            .entry(recipient.clone())
            .or_default()
            .push(header);
        self.touch();
    }

    pub fn recipient_headers(&self, recipient: &Address) -> &[Header] {
        self.recipient_headers
            .get(recipient)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.touch();
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Carve the given recipients out into a fork.
    ///
    /// The fork gets a derived id, the subset's recipients (in original
    /// order) and their queued headers, and copies of the sender,
    /// attributes, payload, and state. The recipients leave this message.
    pub fn split(&mut self, subset: &[Address]) -> Message {
        let fork_recipients: Vec<Address> = self
            .recipients
            .iter()
            .filter(|r| subset.contains(r))
            .cloned()
            .collect();
        self.recipients.retain(|r| !subset.contains(r));

        let mut fork_headers = BTreeMap::new();
        for recipient in &fork_recipients {
            if let Some(headers) = self.recipient_headers.remove(recipient) {
                fork_headers.insert(recipient.clone(), headers);
            }
        }

        self.touch();
        Message {
            id: derived_id(&self.id),
            sender: self.sender.clone(),
            recipients: fork_recipients,
            attributes: self.attributes.clone(),
            recipient_headers: fork_headers,
            payload: self.payload.clone(),
            state: self.state.clone(),
            last_updated: Utc::now(),
            error_message: self.error_message.clone(),
            forks: Vec::new(),
            dispositions: Vec::new(),
        }
    }

    /// A copy carrying only the given recipients (and their headers),
    /// leaving this message untouched. The copy keeps the same id.
    pub fn subset_copy(&self, subset: &[Address]) -> Message {
        let mut copy = self.clone();
        copy.recipients.retain(|r| subset.contains(r));
        copy.recipient_headers.retain(|r, _| subset.contains(r));
        copy.forks = Vec::new();
        copy.dispositions = Vec::new();
        copy
    }

    /// Replace the id with one derived from it, as [`Self::split`] does.
    pub fn derive_id(&mut self) {
        self.id = derived_id(&self.id);
        self.touch();
    }

    /// Split the subset out and queue the fork for re-entry at `stage`.
    /// The driver drains queued forks after the current action returns.
    pub fn divert(&mut self, subset: &[Address], stage: &str) {
        let mut fork = self.split(subset);
        fork.set_state(stage);
        self.forks.push(fork);
    }

    pub fn queue_fork(&mut self, fork: Message) {
        self.forks.push(fork);
    }

    pub fn take_forks(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.forks)
    }

    pub fn record_disposition(&mut self, recipient: Address, disposition: Disposition) {
        self.dispositions.push(RecipientDisposition {
            recipient,
            disposition,
        });
    }

    pub fn take_dispositions(&mut self) -> Vec<RecipientDisposition> {
        std::mem::take(&mut self.dispositions)
    }
}

fn derived_id(parent: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{parent}-{}", &suffix[..8])
}

// ── Builder ─────────────────────────────────────────────────────────

/// Builder for [`Message`]. Without a sender the message carries the null
/// sender; without an id a UUID is generated; the state defaults to
/// [`Message::DEFAULT`].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    id: Option<String>,
    sender: Option<Address>,
    recipients: Vec<Address>,
    attributes: BTreeMap<String, Value>,
    payload: Payload,
    state: Option<String>,
}

impl MessageBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn recipient(mut self, recipient: Address) -> Self {
        if !self.recipients.contains(&recipient) {
            self.recipients.push(recipient);
        }
        self
    }

    pub fn recipients(mut self, recipients: impl IntoIterator<Item = Address>) -> Self {
        for recipient in recipients {
            self = self.recipient(recipient);
        }
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn body(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.payload(Payload::new(bytes))
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self
                .id
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            sender: self.sender,
            recipients: self.recipients,
            attributes: self.attributes,
            recipient_headers: BTreeMap::new(),
            payload: self.payload,
            state: self.state.unwrap_or_else(|| Message::DEFAULT.to_string()),
            last_updated: Utc::now(),
            error_message: None,
            forks: Vec::new(),
            dispositions: Vec::new(),
        }
    }
}
