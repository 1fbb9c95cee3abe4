//! Action contract.

use async_trait::async_trait;

use crate::context::CoreContext;
use crate::error::ActionError;
use crate::model::{Address, Message};

/// A processing step applied to the recipients its matcher selected.
///
/// Actions mutate the message in place: set attributes, queue per-recipient
/// headers, remove recipients (consumption), change `state` to transition
/// stages, or carve a subset into a fork (`Message::divert`) for the driver
/// to route separately. They may call into the [`CoreContext`] for
/// admission control, address resolution, storage, and delayed requeue.
///
/// Returning an error makes the driver divert the matched recipients to the
/// error stage; the message's other recipients continue unaffected.
#[async_trait]
pub trait Action: Send + Sync {
    /// The registry name this action was built under.
    fn name(&self) -> &str;

    async fn apply(
        &self,
        ctx: &CoreContext,
        message: &mut Message,
        matched: &[Address],
    ) -> Result<(), ActionError>;
}
