//! ProcessorRegistry - work item type -> processor factory.
//!
//! Filled once by the builder and shared read-only afterwards
//! (`Arc<ProcessorRegistry>`). A lookup miss is what makes a message with an
//! unknown `type` non-retriable.

use std::collections::HashMap;
use std::sync::Arc;

use super::processor::{DynProcessor, Processor, TypedProcessor};
use crate::domain::WorkItem;
use crate::error::ProcessingError;

type ProcessorFactory =
    Arc<dyn Fn() -> Result<Arc<dyn DynProcessor>, ProcessingError> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("processor for work item type '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// One registered work item type.
#[derive(Clone)]
pub struct Registration {
    work_item_type: &'static str,
    factory: ProcessorFactory,
}

impl Registration {
    pub fn work_item_type(&self) -> &'static str {
        self.work_item_type
    }

    /// Build (or hand out) the processor for one scope.
    pub fn resolve(&self) -> Result<Arc<dyn DynProcessor>, ProcessingError> {
        (self.factory)()
    }
}

#[derive(Default)]
pub struct ProcessorRegistry {
    registrations: HashMap<&'static str, Registration>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor instance shared by every scope.
    pub fn register<T, P>(&mut self, processor: P) -> Result<(), RegistryError>
    where
        T: WorkItem,
        P: Processor<T> + 'static,
    {
        let shared: Arc<dyn DynProcessor> = Arc::new(TypedProcessor::<T, P>::new(processor));
        self.insert(T::TYPE, Arc::new(move || Ok(shared.clone())))
    }

    /// Register a factory that builds a fresh processor for every scope.
    /// A factory error makes the message non-retriable.
    pub fn register_with_factory<T, P, F>(&mut self, factory: F) -> Result<(), RegistryError>
    where
        T: WorkItem,
        P: Processor<T> + 'static,
        F: Fn() -> anyhow::Result<P> + Send + Sync + 'static,
    {
        self.insert(
            T::TYPE,
            Arc::new(move || {
                let processor =
                    factory().map_err(|err| ProcessingError::ProcessorUnavailable {
                        work_item_type: T::TYPE.to_string(),
                        reason: format!("{err:#}"),
                    })?;
                let erased: Arc<dyn DynProcessor> =
                    Arc::new(TypedProcessor::<T, P>::new(processor));
                Ok(erased)
            }),
        )
    }

    fn insert(
        &mut self,
        work_item_type: &'static str,
        factory: ProcessorFactory,
    ) -> Result<(), RegistryError> {
        if self.registrations.contains_key(work_item_type) {
            return Err(RegistryError::AlreadyRegistered(work_item_type.to_string()));
        }
        self.registrations.insert(
            work_item_type,
            Registration {
                work_item_type,
                factory,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, work_item_type: &str) -> Option<&Registration> {
        self.registrations.get(work_item_type)
    }

    /// Sorted, so startup errors and logs are stable.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.registrations.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::processor::testing::{CountingProcessor, Greeting, SubscriptionTrigger};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn register_then_lookup_and_run() {
        let counting = Arc::new(CountingProcessor::default());
        let mut registry = ProcessorRegistry::new();
        registry
            .register::<Greeting, _>(counting.clone())
            .unwrap();

        let registration = registry.lookup("Greeting").unwrap();
        assert_eq!(registration.work_item_type(), "Greeting");

        let prepared = registration
            .resolve()
            .unwrap()
            .prepare(json!({"name": "ada"}))
            .unwrap();
        prepared.execute(&CancellationToken::new()).await.unwrap();
        assert_eq!(counting.calls(), 1);
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register::<Greeting, _>(Arc::new(CountingProcessor::default()))
            .unwrap();

        let result = registry.register::<Greeting, _>(Arc::new(CountingProcessor::default()));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(t)) if t == "Greeting"));
    }

    #[test]
    fn lookup_miss_returns_none() {
        let registry = ProcessorRegistry::new();
        assert!(registry.lookup("Nonexistent").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register::<SubscriptionTrigger, _>(Arc::new(CountingProcessor::default()))
            .unwrap();
        registry
            .register::<Greeting, _>(Arc::new(CountingProcessor::default()))
            .unwrap();

        assert_eq!(
            registry.registered_types(),
            vec!["Greeting", "SubscriptionTrigger"]
        );
    }

    #[test]
    fn factory_runs_per_resolve_and_failures_are_non_retriable() {
        let mut registry = ProcessorRegistry::new();
        registry
            .register_with_factory::<Greeting, Arc<CountingProcessor>, _>(|| {
                Ok(Arc::new(CountingProcessor::default()))
            })
            .unwrap();
        registry
            .register_with_factory::<SubscriptionTrigger, Arc<CountingProcessor>, _>(|| {
                Err(anyhow::anyhow!("connection string missing"))
            })
            .unwrap();

        let a = registry.lookup("Greeting").unwrap().resolve().unwrap();
        let b = registry.lookup("Greeting").unwrap().resolve().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        let err = registry
            .lookup("SubscriptionTrigger")
            .unwrap()
            .resolve()
            .err()
            .unwrap();
        assert!(matches!(err, ProcessingError::ProcessorUnavailable { .. }));
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("connection string missing"));
    }
}
