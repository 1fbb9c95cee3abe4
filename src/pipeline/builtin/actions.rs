//! Builtin actions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ComponentConfig;
use crate::context::CoreContext;
use crate::error::{ActionError, ConfigError};
use crate::limiter::{Admission, Dimension, RateLimitScope, ScopeKey};
use crate::model::{Address, Disposition, Header, Message};
use crate::repository::RepositoryAddress;
use crate::resolver::Resolution;

use super::super::registry::ComponentRegistry;
use super::super::Action;

pub(super) fn register(registry: &mut ComponentRegistry) {
    registry.register_action("deliver", |_config| Ok(Arc::new(Deliver)));
    registry.register_action("discard", |_config| Ok(Arc::new(Discard)));
    registry.register_action("to_stage", |config| {
        Ok(Arc::new(ToStage::from_config(config)?))
    });
    registry.register_action("to_repository", |config| {
        Ok(Arc::new(ToRepository::from_config(config)?))
    });
    registry.register_action("rate_limit", |config| {
        Ok(Arc::new(RateLimit::from_config(config)?))
    });
    registry.register_action("rewrite_recipients", |config| {
        Ok(Arc::new(RewriteRecipients::from_config(config)?))
    });
    registry.register_action("add_recipient_header", |config| {
        Ok(Arc::new(AddRecipientHeader::from_config(config)?))
    });
    registry.register_action("set_attribute", |config| {
        Ok(Arc::new(SetAttribute::from_config(config)?))
    });
}

// ── Terminal actions ────────────────────────────────────────────────

/// Hands the matched recipients to delivery and consumes them. The actual
/// transfer is the front-end's job; the pipeline's output is the
/// disposition.
pub struct Deliver;

#[async_trait]
impl Action for Deliver {
    fn name(&self) -> &str {
        "deliver"
    }

    async fn apply(
        &self,
        _ctx: &CoreContext,
        message: &mut Message,
        matched: &[Address],
    ) -> Result<(), ActionError> {
        for recipient in matched {
            message.record_disposition(recipient.clone(), Disposition::Delivered);
        }
        message.remove_recipients(matched);
        Ok(())
    }
}

/// Consumes the matched recipients without delivering anything.
pub struct Discard;

#[async_trait]
impl Action for Discard {
    fn name(&self) -> &str {
        "discard"
    }

    async fn apply(
        &self,
        _ctx: &CoreContext,
        message: &mut Message,
        matched: &[Address],
    ) -> Result<(), ActionError> {
        for recipient in matched {
            message.record_disposition(recipient.clone(), Disposition::Dropped);
        }
        message.remove_recipients(matched);
        Ok(())
    }
}

// ── Routing actions ─────────────────────────────────────────────────

/// Transitions the matched recipients to another stage. When the whole
/// recipient set matched, the message itself transitions; otherwise the
/// subset forks off and the rest continue.
pub struct ToStage {
    stage: String,
}

impl ToStage {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.require("stage")?))
    }
}

#[async_trait]
impl Action for ToStage {
    fn name(&self) -> &str {
        "to_stage"
    }

    async fn apply(
        &self,
        _ctx: &CoreContext,
        message: &mut Message,
        matched: &[Address],
    ) -> Result<(), ActionError> {
        if matched.len() == message.recipients().len() {
            message.set_state(&self.stage);
        } else {
            message.divert(matched, &self.stage);
        }
        Ok(())
    }
}

/// Parks the matched recipients' message in a repository. Unless
/// `pass_through` is set, the recipients are consumed with a `Stored`
/// disposition; with it, a copy is stored and processing continues.
pub struct ToRepository {
    address: RepositoryAddress,
    pass_through: bool,
}

impl ToRepository {
    pub fn new(address: RepositoryAddress) -> Self {
        Self {
            address,
            pass_through: false,
        }
    }

    pub fn pass_through(mut self, pass_through: bool) -> Self {
        self.pass_through = pass_through;
        self
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        let address = RepositoryAddress::parse(config.require("repository")?).map_err(|err| {
            ConfigError::InvalidValue {
                key: "repository".to_string(),
                message: err.to_string(),
            }
        })?;
        Ok(Self::new(address).pass_through(config.get_bool("pass_through", false)?))
    }
}

#[async_trait]
impl Action for ToRepository {
    fn name(&self) -> &str {
        "to_repository"
    }

    async fn apply(
        &self,
        ctx: &CoreContext,
        message: &mut Message,
        matched: &[Address],
    ) -> Result<(), ActionError> {
        let store = ctx.repositories.select(&self.address).await?;

        let mut copy = message.subset_copy(matched);
        if matched.len() != message.recipients().len() {
            // a partial store must not collide with a later store of the rest
            copy.derive_id();
        }
        store.store(&copy).await?;
        debug!(id = %copy.id(), repository = %self.address, "Message stored");

        if !self.pass_through {
            let repository = self.address.to_string();
            for recipient in matched {
                message.record_disposition(
                    recipient.clone(),
                    Disposition::Stored {
                        repository: repository.clone(),
                    },
                );
            }
            message.remove_recipients(matched);
        }
        Ok(())
    }
}

// ── Rate limiting ───────────────────────────────────────────────────

/// Companion delayed requeue for rejected traffic: wait `delay`, then
/// re-enter the pipeline at `stage`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub stage: String,
}

/// Requests admission for the matched recipients and diverts them to the
/// exceeded stage (or a delayed retry) when any dimension rejects.
/// Admission rejection is normal control flow, not an error.
pub struct RateLimit {
    scope: RateLimitScope,
    exceeded_stage: String,
    retry: Option<RetryPolicy>,
}

impl RateLimit {
    pub fn new(scope: RateLimitScope) -> Self {
        Self {
            scope,
            exceeded_stage: Message::ERROR.to_string(),
            retry: None,
        }
    }

    pub fn exceeded_stage(mut self, stage: impl Into<String>) -> Self {
        self.exceeded_stage = stage.into();
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        let scope = match config.require("scope")? {
            "global" => RateLimitScope::Global,
            "per_sender" => RateLimitScope::PerSender,
            "per_recipient" => RateLimitScope::PerRecipient,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "scope".to_string(),
                    message: format!("unknown scope {other:?}"),
                });
            }
        };
        let mut action = Self::new(scope);
        if let Some(stage) = config.get("exceeded_stage") {
            action = action.exceeded_stage(stage);
        }
        if let Some(delay) = config.get_duration("retry_delay")? {
            action = action.retry(RetryPolicy {
                delay,
                stage: config
                    .get("retry_stage")
                    .unwrap_or(Message::DEFAULT)
                    .to_string(),
            });
        }
        Ok(action)
    }

    fn divert_rejected(
        &self,
        ctx: &CoreContext,
        message: &mut Message,
        rejected: &[Address],
        rule: &str,
        dimension: Dimension,
    ) {
        debug!(
            id = %message.id(),
            rule,
            %dimension,
            rejected = rejected.len(),
            "Admission rejected; diverting recipients"
        );
        let mut fork = message.split(rejected);
        fork.set_attribute("ratelimit.rule", rule);
        fork.set_attribute("ratelimit.dimension", dimension.to_string());
        match &self.retry {
            Some(policy) => {
                fork.set_state(&policy.stage);
                ctx.requeue.submit_after(fork, policy.delay);
            }
            None => {
                fork.set_state(&self.exceeded_stage);
                message.queue_fork(fork);
            }
        }
    }
}

#[async_trait]
impl Action for RateLimit {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn apply(
        &self,
        ctx: &CoreContext,
        message: &mut Message,
        matched: &[Address],
    ) -> Result<(), ActionError> {
        match self.scope {
            RateLimitScope::Global | RateLimitScope::PerSender => {
                let key = if self.scope == RateLimitScope::Global {
                    ScopeKey::Global
                } else {
                    ScopeKey::Sender(message.sender_key())
                };
                match ctx.limiter.try_acquire(&key, message.size(), matched).await {
                    Admission::Admitted => {}
                    Admission::Rejected { rule, dimension } => {
                        self.divert_rejected(ctx, message, matched, &rule, dimension);
                    }
                }
            }
            RateLimitScope::PerRecipient => {
                let mut rejected = Vec::new();
                let mut cause = None;
                for recipient in matched {
                    let key = ScopeKey::Recipient(recipient.to_string());
                    match ctx
                        .limiter
                        .try_acquire(&key, message.size(), std::slice::from_ref(recipient))
                        .await
                    {
                        Admission::Admitted => {}
                        Admission::Rejected { rule, dimension } => {
                            rejected.push(recipient.clone());
                            cause = Some((rule, dimension));
                        }
                    }
                }
                if let Some((rule, dimension)) = cause {
                    self.divert_rejected(ctx, message, &rejected, &rule, dimension);
                }
            }
        }
        Ok(())
    }
}

// ── Address rewriting ───────────────────────────────────────────────

/// Resolves the matched recipients through the rewrite tables, replacing
/// each with its final address set. Recipients whose resolution loops are
/// diverted to the loop stage; siblings are unaffected.
pub struct RewriteRecipients {
    loop_stage: String,
}

impl Default for RewriteRecipients {
    fn default() -> Self {
        Self::new()
    }
}

impl RewriteRecipients {
    pub fn new() -> Self {
        Self {
            loop_stage: Message::ERROR.to_string(),
        }
    }

    pub fn loop_stage(mut self, stage: impl Into<String>) -> Self {
        self.loop_stage = stage.into();
        self
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        let mut action = Self::new();
        if let Some(stage) = config.get("loop_stage") {
            action = action.loop_stage(stage);
        }
        Ok(action)
    }
}

#[async_trait]
impl Action for RewriteRecipients {
    fn name(&self) -> &str {
        "rewrite_recipients"
    }

    async fn apply(
        &self,
        ctx: &CoreContext,
        message: &mut Message,
        matched: &[Address],
    ) -> Result<(), ActionError> {
        let resolutions = ctx.resolver.resolve_all(matched).await;
        let mut looped = Vec::new();
        for (source, resolution) in resolutions {
            match resolution {
                Resolution::Resolved(targets) => {
                    if targets.len() == 1 && targets.contains(&source) {
                        continue;
                    }
                    debug!(id = %message.id(), %source, targets = targets.len(), "Recipient rewritten");
                    message.remove_recipients(std::slice::from_ref(&source));
                    for target in targets {
                        message.add_recipient(target);
                    }
                }
                Resolution::Loop { path } => {
                    warn!(id = %message.id(), recipient = %source, ?path, "Rewrite loop; diverting recipient");
                    looped.push(source);
                }
            }
        }
        if !looped.is_empty() {
            let mut fork = message.split(&looped);
            fork.set_error_message("recipient rewrite loop detected");
            fork.set_state(&self.loop_stage);
            message.queue_fork(fork);
        }
        Ok(())
    }
}

// ── Mutators ────────────────────────────────────────────────────────

/// Queues a header line for each matched recipient.
pub struct AddRecipientHeader {
    header: String,
    value: String,
}

impl AddRecipientHeader {
    pub fn new(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            value: value.into(),
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.require("header")?, config.require("value")?))
    }
}

#[async_trait]
impl Action for AddRecipientHeader {
    fn name(&self) -> &str {
        "add_recipient_header"
    }

    async fn apply(
        &self,
        _ctx: &CoreContext,
        message: &mut Message,
        matched: &[Address],
    ) -> Result<(), ActionError> {
        for recipient in matched {
            message.add_recipient_header(recipient, Header::new(&self.header, &self.value));
        }
        Ok(())
    }
}

/// Sets a string attribute on the message.
pub struct SetAttribute {
    attribute: String,
    value: String,
}

impl SetAttribute {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.require("name")?, config.require("value")?))
    }
}

#[async_trait]
impl Action for SetAttribute {
    fn name(&self) -> &str {
        "set_attribute"
    }

    async fn apply(
        &self,
        _ctx: &CoreContext,
        message: &mut Message,
        _matched: &[Address],
    ) -> Result<(), ActionError> {
        message.set_attribute(&self.attribute, self.value.as_str());
        Ok(())
    }
}
