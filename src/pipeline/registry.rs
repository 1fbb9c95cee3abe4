//! Name → factory registry for matchers and actions.
//!
//! Stage configuration refers to components by name with string parameters;
//! the registry turns those references into live objects at build time. An
//! unknown name is a fatal configuration error, never a runtime one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ComponentConfig;
use crate::error::ConfigError;

use super::builtin;
use super::{Action, Matcher};

type MatcherFactory =
    Box<dyn Fn(&ComponentConfig) -> Result<Arc<dyn Matcher>, ConfigError> + Send + Sync>;
type ActionFactory =
    Box<dyn Fn(&ComponentConfig) -> Result<Arc<dyn Action>, ConfigError> + Send + Sync>;

/// Registry of matcher and action factories.
#[derive(Default)]
pub struct ComponentRegistry {
    matchers: HashMap<String, MatcherFactory>,
    actions: HashMap<String, ActionFactory>,
}

impl ComponentRegistry {
    /// An empty registry; embedding processes register their own packs.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the builtin matcher and action packs.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    pub fn register_matcher<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Matcher>, ConfigError> + Send + Sync + 'static,
    {
        self.matchers.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_action<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Action>, ConfigError> + Send + Sync + 'static,
    {
        self.actions.insert(name.to_string(), Box::new(factory));
    }

    pub fn build_matcher(&self, config: &ComponentConfig) -> Result<Arc<dyn Matcher>, ConfigError> {
        let factory = self
            .matchers
            .get(&config.name)
            .ok_or_else(|| ConfigError::UnknownMatcher(config.name.clone()))?;
        factory(config)
    }

    pub fn build_action(&self, config: &ComponentConfig) -> Result<Arc<dyn Action>, ConfigError> {
        let factory = self
            .actions
            .get(&config.name)
            .ok_or_else(|| ConfigError::UnknownAction(config.name.clone()))?;
        factory(config)
    }

    pub fn matcher_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.matchers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ComponentRegistry::with_builtins();
        assert!(registry.matcher_names().contains(&"all"));
        assert!(registry.matcher_names().contains(&"attachment_filename_is"));
        assert!(registry.action_names().contains(&"to_repository"));
        assert!(registry.action_names().contains(&"rate_limit"));
    }

    #[test]
    fn unknown_names_fail_at_build_time() {
        let registry = ComponentRegistry::with_builtins();
        assert!(matches!(
            registry.build_matcher(&ComponentConfig::new("no-such-matcher")),
            Err(ConfigError::UnknownMatcher(_))
        ));
        assert!(matches!(
            registry.build_action(&ComponentConfig::new("no-such-action")),
            Err(ConfigError::UnknownAction(_))
        ));
    }

    #[test]
    fn custom_registrations_resolve() {
        use crate::model::Message;
        use crate::pipeline::{MatchResult, Matcher};

        struct Nobody;

        impl Matcher for Nobody {
            fn name(&self) -> &str {
                "nobody"
            }

            fn matches(&self, _message: &Message) -> MatchResult {
                MatchResult::NoMatch
            }
        }

        let mut registry = ComponentRegistry::new();
        registry.register_matcher("nobody", |_config| Ok(Arc::new(Nobody)));
        let matcher = registry
            .build_matcher(&ComponentConfig::new("nobody"))
            .unwrap();
        assert_eq!(matcher.name(), "nobody");
    }
}
