//! The matcher/action pipeline.
//!
//! A message flows through named stages, each an ordered list of
//! `(matcher, action)` bindings evaluated strictly in sequence: the matcher
//! selects a recipient subset, the paired action processes it. Actions may
//! transition the message to another stage (processing restarts there),
//! park it in a repository, consume recipients, or divert a subset while
//! the rest continue.

pub mod action;
pub mod builtin;
pub mod matcher;
pub mod processor;
pub mod registry;
pub mod stage;

pub use action::Action;
pub use matcher::{MatchResult, Matcher};
pub use processor::{Pipeline, ProcessReport};
pub use registry::ComponentRegistry;
pub use stage::{Binding, Stage};
