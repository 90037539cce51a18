//! Step handler registry keyed by [`ProvisioningStep`].
//!
//! A registry can only be built when every step of
//! [`ProvisioningStep::PIPELINE`] has exactly one handler, so a step can never
//! be silently unreachable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use provisioner_core::steps::ProvisioningStep;

use crate::step::StepRunner;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("No handler registered for step '{0}'")]
    Missing(ProvisioningStep),

    #[error("More than one handler registered for step '{0}'")]
    Duplicate(ProvisioningStep),

    #[error("Handler registered for marker step '{0}', which never runs")]
    NotExecutable(ProvisioningStep),
}

/// Complete, validated mapping from step to runner.
#[derive(Clone)]
pub struct StepRegistry {
    runners: BTreeMap<ProvisioningStep, Arc<dyn StepRunner>>,
}

impl StepRegistry {
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    /// Runner for `step`. Always `Some` for executable steps.
    pub fn get(&self, step: ProvisioningStep) -> Option<&Arc<dyn StepRunner>> {
        self.runners.get(&step)
    }

    /// Registered steps in pipeline order.
    pub fn steps(&self) -> impl Iterator<Item = ProvisioningStep> + '_ {
        self.runners.keys().copied()
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.runners.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct StepRegistryBuilder {
    runners: Vec<Arc<dyn StepRunner>>,
}

impl StepRegistryBuilder {
    pub fn register(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runners.push(runner);
        self
    }

    pub fn build(self) -> Result<StepRegistry, RegistryError> {
        let mut runners = BTreeMap::new();
        for runner in self.runners {
            let step = runner.step();
            if !step.is_executable() {
                return Err(RegistryError::NotExecutable(step));
            }
            if runners.insert(step, runner).is_some() {
                return Err(RegistryError::Duplicate(step));
            }
        }
        if let Some(missing) = ProvisioningStep::PIPELINE
            .iter()
            .find(|step| !runners.contains_key(*step))
        {
            return Err(RegistryError::Missing(*missing));
        }
        Ok(StepRegistry { runners })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::context::StepContext;
    use crate::step::StepResult;

    struct Noop(ProvisioningStep);

    #[async_trait]
    impl StepRunner for Noop {
        fn step(&self) -> ProvisioningStep {
            self.0
        }

        async fn run(&self, _ctx: &StepContext) -> StepResult {
            StepResult::done()
        }
    }

    fn full() -> StepRegistryBuilder {
        ProvisioningStep::PIPELINE
            .iter()
            .fold(StepRegistry::builder(), |b, step| {
                b.register(Arc::new(Noop(*step)))
            })
    }

    #[test]
    fn complete_registry_builds_in_pipeline_order() {
        let registry = full().build().unwrap();
        let steps: Vec<_> = registry.steps().collect();
        assert_eq!(steps, ProvisioningStep::PIPELINE.to_vec());
    }

    #[test]
    fn missing_handler_is_rejected() {
        let builder = ProvisioningStep::PIPELINE
            .iter()
            .filter(|s| **s != ProvisioningStep::RegisterBilling)
            .fold(StepRegistry::builder(), |b, step| {
                b.register(Arc::new(Noop(*step)))
            });
        assert_matches!(
            builder.build(),
            Err(RegistryError::Missing(ProvisioningStep::RegisterBilling))
        );
    }

    #[test]
    fn duplicate_handler_is_rejected() {
        let builder = full().register(Arc::new(Noop(ProvisioningStep::ConfigureApiKey)));
        assert_matches!(
            builder.build(),
            Err(RegistryError::Duplicate(ProvisioningStep::ConfigureApiKey))
        );
    }

    #[test]
    fn marker_handler_is_rejected() {
        let builder = full().register(Arc::new(Noop(ProvisioningStep::Completed)));
        assert_matches!(
            builder.build(),
            Err(RegistryError::NotExecutable(ProvisioningStep::Completed))
        );
    }
}
