//! CloudProvider - dispatch of resource operations to the per-kind handlers

use log::debug;

use cloudtask_core::provider::{ProviderError, ProviderResult};
use cloudtask_core::resource::{Resource, ResourceId, State};

use crate::api::CloudApi;
use crate::config::{ConfigError, ProviderConfig};
use crate::http::HttpClient;
use crate::resources::{self, Handler, ddos_profile, instance, lb_pool, security_group};

pub struct CloudProvider<A> {
    api: A,
    config: ProviderConfig,
}

impl CloudProvider<HttpClient> {
    /// Provider talking to the HTTP API described by `config`
    pub fn from_config(config: ProviderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let api = HttpClient::new(&config)?;
        Ok(Self::new(api, config))
    }
}

impl<A: CloudApi> CloudProvider<A> {
    pub fn new(api: A, config: ProviderConfig) -> Self {
        Self { api, config }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn handler(&self, id: &ResourceId) -> ProviderResult<Handler<'_, A>> {
        let defaults = resources::default_timeouts(&id.resource_type).ok_or_else(|| unknown(id))?;
        Ok(Handler {
            api: &self.api,
            poll_interval: self.config.poll_interval(),
            timeouts: self.config.timeouts_for(&id.resource_type, defaults),
        })
    }

    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let h = self.handler(id)?;
        match id.resource_type.as_str() {
            instance::NAME => instance::read(&h, id, identifier).await,
            security_group::NAME => security_group::read(&h, id, identifier).await,
            lb_pool::NAME => lb_pool::read(&h, id, identifier).await,
            ddos_profile::NAME => ddos_profile::read(&h, id, identifier).await,
            _ => Err(unknown(id)),
        }
    }

    pub async fn create_resource(&self, resource: &Resource) -> ProviderResult<State> {
        let h = self.handler(&resource.id)?;
        debug!("creating {} (timeout {}s)", resource.id, h.timeouts.create);
        match resource.id.resource_type.as_str() {
            instance::NAME => instance::create(&h, resource).await,
            security_group::NAME => security_group::create(&h, resource).await,
            lb_pool::NAME => lb_pool::create(&h, resource).await,
            ddos_profile::NAME => ddos_profile::create(&h, resource).await,
            _ => Err(unknown(&resource.id)),
        }
    }

    pub async fn update_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let h = self.handler(id)?;
        debug!("updating {} ({})", id, identifier);
        match id.resource_type.as_str() {
            instance::NAME => instance::update(&h, id, identifier, from, to).await,
            security_group::NAME => security_group::update(&h, id, identifier, from, to).await,
            lb_pool::NAME => lb_pool::update(&h, id, identifier, from, to).await,
            ddos_profile::NAME => ddos_profile::update(&h, id, identifier, from, to).await,
            _ => Err(unknown(id)),
        }
    }

    pub async fn delete_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let h = self.handler(id)?;
        debug!("deleting {} ({})", id, identifier);
        match id.resource_type.as_str() {
            instance::NAME => instance::delete(&h, id, identifier).await,
            security_group::NAME => security_group::delete(&h, id, identifier).await,
            lb_pool::NAME => lb_pool::delete(&h, id, identifier).await,
            ddos_profile::NAME => ddos_profile::delete(&h, id, identifier).await,
            _ => Err(unknown(id)),
        }
    }
}

fn unknown(id: &ResourceId) -> ProviderError {
    ProviderError::new(format!("Unknown resource type: {}", id.resource_type)).for_resource(id.clone())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use cloudtask_core::provider::{Provider, TimeoutOverrides};

    use super::*;
    use crate::testing::{FakeCloud, provider};

    #[tokio::test]
    async fn unknown_resource_type() {
        let provider = provider(FakeCloud::new());
        let err = provider
            .create(&Resource::new("volume", "data"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "[volume.data] Unknown resource type: volume");

        let err = provider
            .read(&ResourceId::new("volume", "data"), Some("vol-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown resource type"));
    }

    #[test]
    fn handler_uses_configured_timeouts() {
        let mut timeouts = HashMap::new();
        timeouts.insert(
            "lb_pool".to_string(),
            TimeoutOverrides {
                delete: Some(90),
                ..Default::default()
            },
        );
        let config = ProviderConfig {
            endpoint: "http://cloud.test".to_string(),
            project_id: "1".to_string(),
            region_id: "1".to_string(),
            poll_interval_secs: 5,
            timeouts,
            ..Default::default()
        };
        let provider = CloudProvider::new(FakeCloud::new(), config);

        let h = provider.handler(&ResourceId::new("lb_pool", "web")).unwrap();
        assert_eq!(h.timeouts.delete, 90);
        assert_eq!(h.timeouts.create, lb_pool::TIMEOUTS.create);
        assert_eq!(h.poll_interval, Duration::from_secs(5));

        let h = provider.handler(&ResourceId::new("instance", "web")).unwrap();
        assert_eq!(h.timeouts, instance::TIMEOUTS);
    }

    #[test]
    fn provider_lists_every_kind() {
        let provider = provider(FakeCloud::new());
        assert_eq!(provider.name(), "cloudtask");
        assert_eq!(provider.resource_types().len(), 4);
    }
}
