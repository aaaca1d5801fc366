//! HTTP client for the cloud REST API
//!
//! Resource URLs have the form
//! `{endpoint}/cloud/v1/{collection}/{project_id}/{region_id}/...` and tasks
//! live at `{endpoint}/cloud/v1/tasks/{task_id}`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;

use cloudtask_core::{ClientError, ClientResult, Task, TaskClient, TaskId, TaskResponse};

use crate::api::*;
use crate::config::{ConfigError, ProviderConfig};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpClient {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    region_id: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct ReplaceRule<'a> {
    security_group_id: &'a str,
    #[serde(flatten)]
    rule: &'a RuleSpec,
}

impl HttpClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            region_id: config.region_id.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn url(&self, collection: &str, rest: &str) -> String {
        format!(
            "{}/cloud/v1/{}/{}/{}{}",
            self.endpoint, collection, self.project_id, self.region_id, rest
        )
    }

    fn task_url(&self, task_id: &TaskId) -> String {
        format!("{}/cloud/v1/tasks/{}", self.endpoint, task_id)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.header(AUTHORIZATION, format!("APIKey {}", token)),
            None => builder,
        }
    }

    async fn body(&self, builder: RequestBuilder) -> ClientResult<String> {
        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let body = self.body(builder).await?;
        serde_json::from_str(&body)
            .map_err(|e| ClientError::Decode(format!("failed to parse response: {}, body: {}", e, body)))
    }

    async fn send_empty(&self, builder: RequestBuilder) -> ClientResult<()> {
        self.body(builder).await.map(|_| ())
    }

    /// Send a mutating call and return the task it started
    async fn send_task(&self, builder: RequestBuilder) -> ClientResult<TaskId> {
        self.send::<TaskResponse>(builder).await?.single()
    }
}

fn transport(e: reqwest::Error) -> ClientError {
    ClientError::Transport(e.to_string())
}

/// Map a non-success response to a client error, preferring the API's own
/// `message` field over the raw body
fn status_error(code: u16, body: &str) -> ClientError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    match code {
        404 => ClientError::NotFound(message),
        401 | 403 => ClientError::Unauthorized(message),
        _ => ClientError::Status { code, message },
    }
}

#[async_trait]
impl TaskClient for HttpClient {
    async fn get_task(&self, id: &TaskId) -> ClientResult<Task> {
        self.send(self.request(Method::GET, self.task_url(id))).await
    }
}

#[async_trait]
impl InstanceApi for HttpClient {
    async fn create_instance(&self, request: &InstanceCreate) -> ClientResult<TaskId> {
        let url = self.url("instances", "");
        self.send_task(self.request(Method::POST, url).json(request)).await
    }

    async fn get_instance(&self, id: &str) -> ClientResult<Instance> {
        let url = self.url("instances", &format!("/{}", id));
        self.send(self.request(Method::GET, url)).await
    }

    async fn delete_instance(&self, id: &str) -> ClientResult<TaskId> {
        let url = self.url("instances", &format!("/{}", id));
        self.send_task(self.request(Method::DELETE, url)).await
    }

    async fn attach_interface(&self, id: &str, interface: &InterfaceSpec) -> ClientResult<TaskId> {
        let url = self.url("instances", &format!("/{}/attach_interface", id));
        self.send_task(self.request(Method::POST, url).json(interface)).await
    }

    async fn detach_interface(&self, id: &str, interface: &InterfaceSpec) -> ClientResult<TaskId> {
        let url = self.url("instances", &format!("/{}/detach_interface", id));
        self.send_task(self.request(Method::POST, url).json(interface)).await
    }

    async fn set_metadata(&self, id: &str, items: &BTreeMap<String, String>) -> ClientResult<()> {
        let url = self.url("instances", &format!("/{}/metadata", id));
        self.send_empty(self.request(Method::POST, url).json(items)).await
    }

    async fn delete_metadata_item(&self, id: &str, key: &str) -> ClientResult<()> {
        let url = self.url("instances", &format!("/{}/metadata_item", id));
        self.send_empty(self.request(Method::DELETE, url).query(&[("key", key)]))
            .await
    }
}

#[async_trait]
impl SecurityGroupApi for HttpClient {
    async fn create_security_group(
        &self,
        request: &SecurityGroupCreate,
    ) -> ClientResult<SecurityGroup> {
        let url = self.url("securitygroups", "");
        self.send(self.request(Method::POST, url).json(request)).await
    }

    async fn get_security_group(&self, id: &str) -> ClientResult<SecurityGroup> {
        let url = self.url("securitygroups", &format!("/{}", id));
        self.send(self.request(Method::GET, url)).await
    }

    async fn update_security_group(
        &self,
        id: &str,
        request: &SecurityGroupUpdate,
    ) -> ClientResult<SecurityGroup> {
        let url = self.url("securitygroups", &format!("/{}", id));
        self.send(self.request(Method::PATCH, url).json(request)).await
    }

    async fn delete_security_group(&self, id: &str) -> ClientResult<()> {
        let url = self.url("securitygroups", &format!("/{}", id));
        self.send_empty(self.request(Method::DELETE, url)).await
    }

    async fn add_rule(&self, group_id: &str, rule: &RuleSpec) -> ClientResult<Rule> {
        let url = self.url("securitygroups", &format!("/{}/rules", group_id));
        self.send(self.request(Method::POST, url).json(rule)).await
    }

    async fn replace_rule(
        &self,
        group_id: &str,
        rule_id: &str,
        rule: &RuleSpec,
    ) -> ClientResult<Rule> {
        let url = self.url("securitygrouprules", &format!("/{}", rule_id));
        let body = ReplaceRule {
            security_group_id: group_id,
            rule,
        };
        self.send(self.request(Method::PUT, url).json(&body)).await
    }

    async fn delete_rule(&self, rule_id: &str) -> ClientResult<()> {
        let url = self.url("securitygrouprules", &format!("/{}", rule_id));
        self.send_empty(self.request(Method::DELETE, url)).await
    }
}

#[async_trait]
impl LoadBalancerApi for HttpClient {
    async fn create_pool(&self, request: &PoolCreate) -> ClientResult<TaskId> {
        let url = self.url("lbpools", "");
        self.send_task(self.request(Method::POST, url).json(request)).await
    }

    async fn get_pool(&self, id: &str) -> ClientResult<Pool> {
        let url = self.url("lbpools", &format!("/{}", id));
        self.send(self.request(Method::GET, url)).await
    }

    async fn delete_pool(&self, id: &str) -> ClientResult<TaskId> {
        let url = self.url("lbpools", &format!("/{}", id));
        self.send_task(self.request(Method::DELETE, url)).await
    }

    async fn add_member(&self, pool_id: &str, member: &MemberSpec) -> ClientResult<TaskId> {
        let url = self.url("lbpools", &format!("/{}/member", pool_id));
        self.send_task(self.request(Method::POST, url).json(member)).await
    }

    async fn remove_member(&self, pool_id: &str, member_id: &str) -> ClientResult<TaskId> {
        let url = self.url("lbpools", &format!("/{}/member/{}", pool_id, member_id));
        self.send_task(self.request(Method::DELETE, url)).await
    }
}

#[async_trait]
impl DdosApi for HttpClient {
    async fn create_ddos_profile(&self, request: &DdosProfileCreate) -> ClientResult<TaskId> {
        let url = self.url("ddos/profiles", "");
        self.send_task(self.request(Method::POST, url).json(request)).await
    }

    async fn get_ddos_profile(&self, id: &str) -> ClientResult<DdosProfile> {
        let url = self.url("ddos/profiles", &format!("/{}", id));
        self.send(self.request(Method::GET, url)).await
    }

    async fn activate_ddos_profile(&self, id: &str) -> ClientResult<TaskId> {
        let url = self.url("ddos/profiles", &format!("/{}/activate", id));
        self.send_task(self.request(Method::POST, url)).await
    }

    async fn deactivate_ddos_profile(&self, id: &str) -> ClientResult<TaskId> {
        let url = self.url("ddos/profiles", &format!("/{}/deactivate", id));
        self.send_task(self.request(Method::POST, url)).await
    }

    async fn delete_ddos_profile(&self, id: &str) -> ClientResult<TaskId> {
        let url = self.url("ddos/profiles", &format!("/{}", id));
        self.send_task(self.request(Method::DELETE, url)).await
    }
}
