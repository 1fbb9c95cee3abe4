//! Builtin matcher and action packs.

pub mod actions;
pub mod matchers;

pub use actions::{
    AddRecipientHeader, Deliver, Discard, RateLimit, RetryPolicy, RewriteRecipients,
    SetAttribute, ToRepository, ToStage,
};
pub use matchers::{
    All, AttachmentFileNameIs, HasAttribute, RecipientDomainIs, RecipientIs, SenderIs,
    SenderIsNull, SenderMatches, SizeGreaterThan, ATTACHMENTS_ATTRIBUTE,
};

use super::registry::ComponentRegistry;

/// Register both packs on a registry.
pub(super) fn register(registry: &mut ComponentRegistry) {
    matchers::register(registry);
    actions::register(registry);
}
