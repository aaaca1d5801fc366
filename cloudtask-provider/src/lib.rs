//! Cloudtask Provider
//!
//! Resource handlers for a cloud API whose mutating calls return task IDs.
//!
//! ## Module Structure
//!
//! - `api` - Request/response models and per-service client traits
//! - `http` - reqwest implementation of those traits
//! - `config` - Provider configuration file and environment overrides
//! - `resources` - Resource type definitions and per-kind handlers
//! - `provider` - CloudProvider, dispatching operations to the handlers

pub mod api;
pub mod config;
pub mod http;
pub mod provider;
pub mod resources;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::{ConfigError, ProviderConfig};
pub use http::HttpClient;
pub use provider::CloudProvider;

use cloudtask_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use cloudtask_core::resource::{Resource, ResourceId, State};

use api::CloudApi;
use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl<A: CloudApi + 'static> Provider for CloudProvider<A> {
    fn name(&self) -> &'static str {
        "cloudtask"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&id, &identifier, &from, &to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }
}
