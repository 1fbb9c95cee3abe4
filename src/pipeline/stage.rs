//! Stages — named, ordered lists of matcher/action bindings.

use std::sync::Arc;

use super::{Action, Matcher};

/// One `(matcher, action)` pair.
#[derive(Clone)]
pub struct Binding {
    pub matcher: Arc<dyn Matcher>,
    pub action: Arc<dyn Action>,
}

/// A named processing stage. Bindings run in configuration order; when none
/// of them consume the message, processing falls back to the parent stage
/// if one is configured.
pub struct Stage {
    name: String,
    parent: Option<String>,
    bindings: Vec<Binding>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            bindings: Vec::new(),
        }
    }

    pub fn parent(mut self, name: impl Into<String>) -> Self {
        self.parent = Some(name.into());
        self
    }

    pub fn binding(mut self, matcher: Arc<dyn Matcher>, action: Arc<dyn Action>) -> Self {
        self.bindings.push(Binding { matcher, action });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }
}
