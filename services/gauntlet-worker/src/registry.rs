//! Named scenario factories.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use gauntlet_core::{HarnessError, HarnessResult, LoadTest};

/// Builds one scenario instance from a coordinator's properties map.
pub type ScenarioFactory =
    Arc<dyn Fn(&BTreeMap<String, String>) -> HarnessResult<Arc<dyn LoadTest>> + Send + Sync>;

/// Maps scenario names to factories.
///
/// Registered once at startup; a create-test command instantiates a
/// scenario by name with the properties the coordinator sent along.
#[derive(Default)]
pub struct TestRegistry {
    factories: RwLock<HashMap<String, ScenarioFactory>>,
}

impl TestRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a scenario under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, factory: ScenarioFactory) {
        self.factories.write().insert(name.into(), factory);
    }

    /// Instantiates the scenario registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown names; factory errors
    /// pass through.
    pub fn create(
        &self,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> HarnessResult<Arc<dyn LoadTest>> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::configuration(format!("unknown scenario: {name}")))?;
        factory(properties)
    }

    /// Names of the registered scenarios, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl LoadTest for Noop {}

    #[test]
    fn test_create_unknown_scenario_fails() {
        let registry = TestRegistry::new();
        let result = registry.create("missing", &BTreeMap::new());
        assert!(matches!(result, Err(HarnessError::Configuration { .. })));
    }

    #[test]
    fn test_registered_factory_receives_properties() {
        let registry = TestRegistry::new();
        registry.register(
            "noop",
            Arc::new(|props| {
                if props.contains_key("explode") {
                    return Err(HarnessError::configuration("asked to explode"));
                }
                Ok(Arc::new(Noop) as Arc<dyn LoadTest>)
            }),
        );

        assert!(registry.create("noop", &BTreeMap::new()).is_ok());
        let props = BTreeMap::from([("explode".to_string(), "1".to_string())]);
        assert!(registry.create("noop", &props).is_err());
        assert_eq!(registry.names(), vec!["noop".to_string()]);
    }
}
