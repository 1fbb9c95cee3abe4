//! The stage/binding state machine driver.
//!
//! One call to [`Pipeline::process`] drives a message, and every fork
//! carved off it, to a terminal disposition. State transition is the only
//! looping construct: an action sets `state`, the driver looks the stage up
//! and restarts from its first binding. An action failing for its matched
//! subset diverts only that subset to the error stage.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::context::CoreContext;
use crate::error::ConfigError;
use crate::model::{Address, Disposition, Message, RecipientDisposition};

use super::registry::ComponentRegistry;
use super::{MatchResult, Stage};

/// Upper bound on stage transitions for one message; a stage graph that
/// cycles is a configuration error, this keeps it from spinning forever.
const MAX_STAGE_TRANSITIONS: usize = 64;

/// Terminal outcome of one [`Pipeline::process`] call: the entry message's
/// id and a disposition for every recipient it entered with (including
/// recipients that finished on forks).
#[derive(Debug)]
pub struct ProcessReport {
    pub message_id: String,
    pub dispositions: Vec<RecipientDisposition>,
}

impl ProcessReport {
    /// The disposition recorded for one recipient, if any.
    pub fn disposition_for(&self, recipient: &Address) -> Option<&Disposition> {
        self.dispositions
            .iter()
            .find(|d| &d.recipient == recipient)
            .map(|d| &d.disposition)
    }
}

/// The assembled stage graph plus the context actions run against.
pub struct Pipeline {
    stages: HashMap<String, Stage>,
    ctx: Arc<CoreContext>,
}

impl Pipeline {
    /// Validate and assemble the stage graph. The graph must contain the
    /// root stage and every configured parent; duplicates are rejected.
    pub fn new(stages: Vec<Stage>, ctx: Arc<CoreContext>) -> Result<Self, ConfigError> {
        let mut map: HashMap<String, Stage> = HashMap::with_capacity(stages.len());
        for stage in stages {
            if map.contains_key(stage.name()) {
                return Err(ConfigError::DuplicateStage(stage.name().to_string()));
            }
            map.insert(stage.name().to_string(), stage);
        }
        if !map.contains_key(Message::DEFAULT) {
            return Err(ConfigError::UnknownStage(Message::DEFAULT.to_string()));
        }
        for stage in map.values() {
            if let Some(parent) = stage.parent_name()
                && !map.contains_key(parent)
            {
                return Err(ConfigError::UnknownStage(parent.to_string()));
            }
        }
        if !map.contains_key(Message::ERROR) {
            warn!("No error stage configured; failed recipients end as errored dispositions");
        }
        Ok(Self { stages: map, ctx })
    }

    /// Assemble a pipeline from configuration data through the component
    /// registry.
    pub fn from_config(
        config: &PipelineConfig,
        registry: &ComponentRegistry,
        ctx: Arc<CoreContext>,
    ) -> Result<Self, ConfigError> {
        let mut stages = Vec::with_capacity(config.stages.len());
        for stage_config in &config.stages {
            let mut stage = Stage::new(&stage_config.name);
            if let Some(parent) = &stage_config.parent {
                stage = stage.parent(parent);
            }
            for binding in &stage_config.bindings {
                let matcher = registry.build_matcher(&binding.matcher)?;
                let action = registry.build_action(&binding.action)?;
                stage = stage.binding(matcher, action);
            }
            stages.push(stage);
        }
        Self::new(stages, ctx)
    }

    pub fn context(&self) -> &Arc<CoreContext> {
        &self.ctx
    }

    /// Drive a message (and any forks it spawns) to terminal dispositions.
    pub async fn process(&self, message: Message) -> ProcessReport {
        let message_id = message.id().to_string();
        let mut dispositions = Vec::new();
        let mut work = VecDeque::from([message]);
        while let Some(mut mail) = work.pop_front() {
            self.drive(&mut mail, &mut work, &mut dispositions).await;
        }
        ProcessReport {
            message_id,
            dispositions,
        }
    }

    async fn drive(
        &self,
        mail: &mut Message,
        work: &mut VecDeque<Message>,
        dispositions: &mut Vec<RecipientDisposition>,
    ) {
        let mut transitions = 0usize;
        'stage: loop {
            if mail.recipients().is_empty() {
                break;
            }
            transitions += 1;
            if transitions > MAX_STAGE_TRANSITIONS {
                warn!(id = %mail.id(), state = %mail.state(), "Stage transition limit hit; stage graph likely cycles");
                self.fail_remaining(mail, "stage transition limit exceeded", dispositions);
                break;
            }

            let Some(stage) = self.stages.get(mail.state()) else {
                warn!(id = %mail.id(), state = %mail.state(), "Message entered unknown stage");
                let reason = format!("unknown stage {:?}", mail.state());
                if mail.state() != Message::ERROR && self.stages.contains_key(Message::ERROR) {
                    mail.set_error_message(reason);
                    mail.set_state(Message::ERROR);
                    continue 'stage;
                }
                self.fail_remaining(mail, &reason, dispositions);
                break;
            };
            debug!(id = %mail.id(), stage = %stage.name(), recipients = mail.recipients().len(), "Entering stage");

            for binding in stage.bindings() {
                if mail.recipients().is_empty() {
                    // fully consumed; later bindings never see this message
                    break 'stage;
                }
                let matched = match binding.matcher.matches(mail) {
                    MatchResult::NoMatch => continue,
                    MatchResult::Matched(subset) => {
                        // only recipients still present are visible
                        let subset: Vec<Address> = subset
                            .into_iter()
                            .filter(|r| mail.contains_recipient(r))
                            .collect();
                        if subset.is_empty() {
                            continue;
                        }
                        subset
                    }
                };
                debug!(
                    id = %mail.id(),
                    matcher = %binding.matcher.name(),
                    action = %binding.action.name(),
                    matched = matched.len(),
                    "Binding matched"
                );

                let state_before = mail.state().to_string();
                match binding.action.apply(&self.ctx, mail, &matched).await {
                    Ok(()) => {
                        work.extend(mail.take_forks());
                        dispositions.append(&mut mail.take_dispositions());
                        if mail.state() != state_before {
                            continue 'stage;
                        }
                    }
                    Err(err) => {
                        warn!(
                            id = %mail.id(),
                            action = %binding.action.name(),
                            error = %err,
                            "Action failed; diverting matched recipients to the error stage"
                        );
                        work.extend(mail.take_forks());
                        dispositions.append(&mut mail.take_dispositions());
                        let affected: Vec<Address> = matched
                            .iter()
                            .filter(|r| mail.contains_recipient(r))
                            .cloned()
                            .collect();
                        if affected.is_empty() {
                            continue;
                        }
                        let mut failed = mail.split(&affected);
                        failed.set_error_message(err.to_string());
                        if stage.name() != Message::ERROR
                            && self.stages.contains_key(Message::ERROR)
                        {
                            failed.set_state(Message::ERROR);
                            work.push_back(failed);
                        } else {
                            // failing inside (or without) the error stage is
                            // terminal; never drop recipients silently
                            self.fail_remaining(&mut failed, "action failed", dispositions);
                        }
                    }
                }
            }

            if mail.recipients().is_empty() {
                break;
            }
            if let Some(parent) = stage.parent_name() {
                debug!(id = %mail.id(), stage = %stage.name(), parent = %parent, "Falling back to parent stage");
                let parent = parent.to_string();
                mail.set_state(parent);
                continue 'stage;
            }

            // recipients remain with nothing left to run — route to the
            // error stage rather than dropping them without a disposition
            let reason = format!(
                "reached the end of stage {:?} without a terminal disposition",
                stage.name()
            );
            if mail.state() != Message::ERROR && self.stages.contains_key(Message::ERROR) {
                mail.set_error_message(reason);
                mail.set_state(Message::ERROR);
                continue 'stage;
            }
            self.fail_remaining(mail, &reason, dispositions);
            break;
        }
        dispositions.append(&mut mail.take_dispositions());
    }

    fn fail_remaining(
        &self,
        mail: &mut Message,
        fallback_reason: &str,
        dispositions: &mut Vec<RecipientDisposition>,
    ) {
        let reason = mail
            .error_message()
            .unwrap_or(fallback_reason)
            .to_string();
        let remaining = mail.recipients().to_vec();
        for recipient in &remaining {
            dispositions.push(RecipientDisposition {
                recipient: recipient.clone(),
                disposition: Disposition::Errored {
                    reason: reason.clone(),
                },
            });
        }
        mail.remove_recipients(&remaining);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::context::RequeueHandle;
    use crate::error::ActionError;
    use crate::limiter::RateLimiter;
    use crate::pipeline::{Action, Matcher};
    use crate::repository::RepositoryRegistry;
    use crate::resolver::AddressResolver;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn test_ctx() -> Arc<CoreContext> {
        let (requeue, _rx) = RequeueHandle::channel();
        Arc::new(CoreContext::new(
            Arc::new(RateLimiter::unlimited()),
            Arc::new(AddressResolver::new()),
            Arc::new(RepositoryRegistry::with_default_protocols()),
            requeue,
        ))
    }

    struct All;

    impl Matcher for All {
        fn name(&self) -> &str {
            "all"
        }

        fn matches(&self, message: &Message) -> MatchResult {
            MatchResult::from_subset(message.recipients().to_vec())
        }
    }

    struct OneOf(Address);

    impl Matcher for OneOf {
        fn name(&self) -> &str {
            "one_of"
        }

        fn matches(&self, message: &Message) -> MatchResult {
            MatchResult::from_subset(
                message
                    .recipients()
                    .iter()
                    .filter(|r| **r == self.0)
                    .cloned()
                    .collect(),
            )
        }
    }

    /// Records every subset it was applied to, then consumes it.
    #[derive(Default)]
    struct ConsumeRecording {
        calls: Mutex<Vec<Vec<Address>>>,
        errors_seen: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Action for ConsumeRecording {
        fn name(&self) -> &str {
            "consume_recording"
        }

        async fn apply(
            &self,
            _ctx: &CoreContext,
            message: &mut Message,
            matched: &[Address],
        ) -> Result<(), ActionError> {
            self.calls.lock().unwrap().push(matched.to_vec());
            self.errors_seen
                .lock()
                .unwrap()
                .push(message.error_message().map(String::from));
            for recipient in matched {
                message.record_disposition(recipient.clone(), Disposition::Delivered);
            }
            message.remove_recipients(matched);
            Ok(())
        }
    }

    struct ToStage(&'static str);

    #[async_trait]
    impl Action for ToStage {
        fn name(&self) -> &str {
            "to_stage"
        }

        async fn apply(
            &self,
            _ctx: &CoreContext,
            message: &mut Message,
            _matched: &[Address],
        ) -> Result<(), ActionError> {
            message.set_state(self.0);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Action for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn apply(
            &self,
            _ctx: &CoreContext,
            _message: &mut Message,
            _matched: &[Address],
        ) -> Result<(), ActionError> {
            Err(ActionError::failed("failing", "backend unavailable"))
        }
    }

    fn two_recipient_mail() -> Message {
        Message::builder()
            .id("m1")
            .sender(addr("sender@d.com"))
            .recipients([addr("a@d.com"), addr("b@d.com")])
            .build()
    }

    #[tokio::test]
    async fn short_circuits_after_full_consumption() {
        let first = Arc::new(ConsumeRecording::default());
        let second = Arc::new(ConsumeRecording::default());
        let pipeline = Pipeline::new(
            vec![
                Stage::new(Message::DEFAULT)
                    .binding(Arc::new(All), first.clone())
                    .binding(Arc::new(All), second.clone()),
            ],
            test_ctx(),
        )
        .unwrap();

        pipeline.process(two_recipient_mail()).await;

        assert_eq!(first.calls.lock().unwrap().len(), 1);
        assert!(second.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn later_bindings_see_only_remaining_recipients() {
        let rest = Arc::new(ConsumeRecording::default());
        let pipeline = Pipeline::new(
            vec![
                Stage::new(Message::DEFAULT)
                    .binding(
                        Arc::new(OneOf(addr("a@d.com"))),
                        Arc::new(ConsumeRecording::default()),
                    )
                    .binding(Arc::new(All), rest.clone()),
            ],
            test_ctx(),
        )
        .unwrap();

        pipeline.process(two_recipient_mail()).await;

        let calls = rest.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[vec![addr("b@d.com")]]);
    }

    #[tokio::test]
    async fn state_transition_restarts_in_target_stage() {
        let delivered = Arc::new(ConsumeRecording::default());
        let pipeline = Pipeline::new(
            vec![
                Stage::new(Message::DEFAULT).binding(Arc::new(All), Arc::new(ToStage("transport"))),
                Stage::new("transport").binding(Arc::new(All), delivered.clone()),
            ],
            test_ctx(),
        )
        .unwrap();

        let report = pipeline.process(two_recipient_mail()).await;

        assert_eq!(delivered.calls.lock().unwrap().len(), 1);
        assert_eq!(
            report.disposition_for(&addr("a@d.com")),
            Some(&Disposition::Delivered)
        );
        assert_eq!(
            report.disposition_for(&addr("b@d.com")),
            Some(&Disposition::Delivered)
        );
    }

    #[tokio::test]
    async fn falls_back_to_parent_stage() {
        let delivered = Arc::new(ConsumeRecording::default());
        let pipeline = Pipeline::new(
            vec![
                Stage::new(Message::DEFAULT).binding(Arc::new(All), delivered.clone()),
                Stage::new("child").parent(Message::DEFAULT),
            ],
            test_ctx(),
        )
        .unwrap();

        let mut mail = two_recipient_mail();
        mail.set_state("child");
        pipeline.process(mail).await;

        assert_eq!(delivered.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn action_failure_diverts_only_matched_recipients() {
        let error_sink = Arc::new(ConsumeRecording::default());
        let delivered = Arc::new(ConsumeRecording::default());
        let pipeline = Pipeline::new(
            vec![
                Stage::new(Message::DEFAULT)
                    .binding(Arc::new(OneOf(addr("a@d.com"))), Arc::new(Failing))
                    .binding(Arc::new(All), delivered.clone()),
                Stage::new(Message::ERROR).binding(Arc::new(All), error_sink.clone()),
            ],
            test_ctx(),
        )
        .unwrap();

        pipeline.process(two_recipient_mail()).await;

        // the sibling recipient kept flowing through the original stage
        assert_eq!(
            delivered.calls.lock().unwrap().as_slice(),
            &[vec![addr("b@d.com")]]
        );
        // the failed recipient arrived in the error stage with the reason
        assert_eq!(
            error_sink.calls.lock().unwrap().as_slice(),
            &[vec![addr("a@d.com")]]
        );
        let errors = error_sink.errors_seen.lock().unwrap();
        assert!(errors[0].as_deref().unwrap().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn unknown_stage_routes_to_error_stage() {
        let error_sink = Arc::new(ConsumeRecording::default());
        let pipeline = Pipeline::new(
            vec![
                Stage::new(Message::DEFAULT),
                Stage::new(Message::ERROR).binding(Arc::new(All), error_sink.clone()),
            ],
            test_ctx(),
        )
        .unwrap();

        let mut mail = two_recipient_mail();
        mail.set_state("no-such-stage");
        pipeline.process(mail).await;

        assert_eq!(error_sink.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fell_off_stage_without_error_stage_records_errored() {
        let pipeline = Pipeline::new(vec![Stage::new(Message::DEFAULT)], test_ctx()).unwrap();

        let report = pipeline.process(two_recipient_mail()).await;

        assert_eq!(report.dispositions.len(), 2);
        for disposition in &report.dispositions {
            assert!(matches!(
                disposition.disposition,
                Disposition::Errored { .. }
            ));
        }
    }

    #[tokio::test]
    async fn stage_cycle_is_bounded() {
        let pipeline = Pipeline::new(
            vec![
                Stage::new(Message::DEFAULT).binding(Arc::new(All), Arc::new(ToStage("pong"))),
                Stage::new("pong").binding(Arc::new(All), Arc::new(ToStage(Message::DEFAULT))),
            ],
            test_ctx(),
        )
        .unwrap();

        let report = pipeline.process(two_recipient_mail()).await;

        // terminates with errored dispositions instead of spinning
        assert_eq!(report.dispositions.len(), 2);
        assert!(matches!(
            report.dispositions[0].disposition,
            Disposition::Errored { .. }
        ));
    }

    #[tokio::test]
    async fn validation_rejects_bad_graphs() {
        assert!(matches!(
            Pipeline::new(vec![Stage::new("transport")], test_ctx()),
            Err(ConfigError::UnknownStage(_))
        ));
        assert!(matches!(
            Pipeline::new(
                vec![Stage::new(Message::DEFAULT), Stage::new(Message::DEFAULT)],
                test_ctx()
            ),
            Err(ConfigError::DuplicateStage(_))
        ));
        assert!(matches!(
            Pipeline::new(
                vec![
                    Stage::new(Message::DEFAULT),
                    Stage::new("child").parent("missing")
                ],
                test_ctx()
            ),
            Err(ConfigError::UnknownStage(_))
        ));
    }
}
