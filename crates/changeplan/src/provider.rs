//! Resource provider capability
//!
//! The execution coordinator applies changes through this trait, so the
//! remote endpoint can be swapped without touching planning or execution.

use crate::error::{Error, Result};
use crate::types::{Resource, ResourceConfig, ResourceStatus};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operations a resource-management endpoint offers.
pub trait ResourceProvider: Send + Sync {
    /// Create a resource, returning the record the endpoint assigned.
    fn create(&self, config: &ResourceConfig) -> Result<Resource>;

    /// Reconfigure an existing resource.
    fn update(&self, current: &ResourceConfig, desired: &ResourceConfig) -> Result<Resource>;

    /// Remove a resource.
    ///
    /// # Errors
    ///
    /// Returns `Error::ResourceNotFound` if the endpoint does not know it.
    fn delete(&self, config: &ResourceConfig) -> Result<()>;

    /// Read a single resource record.
    fn get(&self, resource_type: &str, resource_id: &str) -> Result<Resource>;

    /// Query a resource's lifecycle status.
    fn status(&self, resource_type: &str, resource_id: &str) -> Result<ResourceStatus>;

    /// Check that the endpoint is serving.
    fn health(&self) -> Result<()>;
}

/// In-memory provider for testing without network access.
///
/// Records every call and can be told to fail for chosen resource ids.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    resources: Arc<Mutex<BTreeMap<String, Resource>>>,
    failing: Arc<Mutex<BTreeSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockProvider {
    /// Create a new empty mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `resource_id` fail with a connection error.
    pub fn fail_on(&self, resource_id: impl Into<String>) {
        lock(&self.failing).insert(resource_id.into());
    }

    /// Seed an existing resource.
    pub fn insert(&self, resource: Resource) {
        lock(&self.resources).insert(resource.id.clone(), resource);
    }

    /// Calls made so far, as `"<operation> <resource id>"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Resource ids currently held.
    pub fn resource_ids(&self) -> Vec<String> {
        lock(&self.resources).keys().cloned().collect()
    }

    fn record(&self, operation: &str, resource_id: &str) -> Result<()> {
        lock(&self.calls).push(format!("{operation} {resource_id}"));
        if lock(&self.failing).contains(resource_id) {
            return Err(Error::ConnectionFailure {
                target: "mock".to_string(),
                message: format!("injected failure for {resource_id}"),
            });
        }
        Ok(())
    }
}

impl ResourceProvider for MockProvider {
    fn create(&self, config: &ResourceConfig) -> Result<Resource> {
        self.record("create", &config.id)?;
        let mut resource = Resource::from_config(config, Utc::now());
        resource.arn = Some(format!("arn:mock:{}:{}", config.resource_type, config.id));
        lock(&self.resources).insert(config.id.clone(), resource.clone());
        Ok(resource)
    }

    fn update(&self, _current: &ResourceConfig, desired: &ResourceConfig) -> Result<Resource> {
        self.record("update", &desired.id)?;
        let mut resources = lock(&self.resources);
        let now = Utc::now();
        let mut resource = Resource::from_config(desired, now);
        if let Some(existing) = resources.get(&desired.id) {
            resource.created_at = existing.created_at;
            resource.arn.clone_from(&existing.arn);
        }
        resources.insert(desired.id.clone(), resource.clone());
        Ok(resource)
    }

    fn delete(&self, config: &ResourceConfig) -> Result<()> {
        self.record("delete", &config.id)?;
        lock(&self.resources)
            .remove(&config.id)
            .map(|_| ())
            .ok_or_else(|| Error::ResourceNotFound {
                resource_id: config.id.clone(),
            })
    }

    fn get(&self, _resource_type: &str, resource_id: &str) -> Result<Resource> {
        self.record("get", resource_id)?;
        lock(&self.resources)
            .get(resource_id)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                resource_id: resource_id.to_string(),
            })
    }

    fn status(&self, resource_type: &str, resource_id: &str) -> Result<ResourceStatus> {
        self.get(resource_type, resource_id).map(|r| r.status)
    }

    fn health(&self) -> Result<()> {
        lock(&self.calls).push("health".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_create_get_delete() {
        let provider = MockProvider::new();
        let cfg = ResourceConfig::new("bucket-1", "bucket", "eu-west-1");
        let created = provider.create(&cfg).unwrap();
        assert_eq!(created.status, ResourceStatus::Active);
        assert!(created.arn.is_some());

        assert_eq!(provider.get("bucket", "bucket-1").unwrap().id, "bucket-1");
        assert_eq!(
            provider.status("bucket", "bucket-1").unwrap(),
            ResourceStatus::Active
        );

        provider.delete(&cfg).unwrap();
        assert!(matches!(
            provider.get("bucket", "bucket-1"),
            Err(Error::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_mock_update_keeps_creation_time() {
        let provider = MockProvider::new();
        let cfg = ResourceConfig::new("q", "queue", "r");
        let created = provider.create(&cfg).unwrap();
        let updated = provider
            .update(&cfg, &cfg.clone().with_property("retention", 7))
            .unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.arn, created.arn);
    }

    #[test]
    fn test_mock_failure_injection() {
        let provider = MockProvider::new();
        provider.fail_on("bad");
        let err = provider
            .create(&ResourceConfig::new("bad", "t", "r"))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(provider.calls(), vec!["create bad"]);
        assert!(provider.resource_ids().is_empty());
    }
}
