use crate::error::{PipelineError, Result};
use crate::steps::{Step, StepArgs, StepContext, StepFactory, builtin_factories};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps step type names to constructors.
///
/// [`StepRegistry::default()`] knows every built-in step. External step
/// types are added with [`register`](Self::register); registering an existing
/// name replaces its constructor.
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = StepRegistry::default();
/// registry.register("Scale", |args, _ctx| {
///     Ok(Box::new(Scale::from_args(args)?))
/// });
/// ```
#[derive(Clone)]
pub struct StepRegistry {
    factories: BTreeMap<String, StepFactory>,
}

impl Default for StepRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (name, factory) in builtin_factories() {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }
}

impl StepRegistry {
    /// Registry with no step types at all.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&StepArgs, &StepContext) -> Result<Box<dyn Step>> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
        self
    }

    /// Constructor for `type_name`.
    pub fn resolve(&self, type_name: &str) -> Result<StepFactory> {
        self.factories
            .get(type_name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownStepType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("type_names", &self.type_names())
            .finish()
    }
}
