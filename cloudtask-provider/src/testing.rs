//! In-memory cloud for handler tests
//!
//! Every asynchronous call starts a task that reports RUNNING for
//! `SETTLE_POLLS` polls and then finishes, applying its effect at that moment.
//! A failure registered for an operation makes its tasks end in ERROR with
//! the effect never applied.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use cloudtask_core::{
    ClientError, ClientResult, CreatedResources, Task, TaskClient, TaskId, TaskStatus,
};

use crate::api::*;
use crate::config::ProviderConfig;
use crate::provider::CloudProvider;

const SETTLE_POLLS: u32 = 1;

type Effect = Box<dyn FnOnce(&mut Inner) + Send>;

struct FakeTask {
    polls_left: u32,
    failure: Option<String>,
    created: CreatedResources,
    effect: Option<Effect>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    tasks: HashMap<TaskId, FakeTask>,
    instances: BTreeMap<String, Instance>,
    groups: BTreeMap<String, SecurityGroup>,
    pools: BTreeMap<String, Pool>,
    profiles: BTreeMap<String, DdosProfile>,
    calls: Vec<String>,
    failures: HashMap<String, String>,
}

impl Inner {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn record(&mut self, call: String) {
        self.calls.push(call);
    }

    fn start(
        &mut self,
        operation: &str,
        created: CreatedResources,
        effect: impl FnOnce(&mut Inner) + Send + 'static,
    ) -> TaskId {
        let id = TaskId::new(self.next("task"));
        let task = FakeTask {
            polls_left: SETTLE_POLLS,
            failure: self.failures.get(operation).cloned(),
            created,
            effect: Some(Box::new(effect)),
        };
        self.tasks.insert(id.clone(), task);
        id
    }
}

pub struct FakeCloud {
    inner: Mutex<Inner>,
    rule_replace: bool,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            rule_replace: true,
        }
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_rule_replace(mut self) -> Self {
        self.rule_replace = false;
        self
    }

    /// Make every later task of `operation` end in ERROR with `message`
    pub fn fail_task(&self, operation: &str, message: &str) {
        self.lock()
            .failures
            .insert(operation.to_string(), message.to_string());
    }

    /// Mutating calls received so far, one line each
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn instance(&self, id: &str) -> Option<Instance> {
        self.lock().instances.get(id).cloned()
    }

    pub fn pool(&self, id: &str) -> Option<Pool> {
        self.lock().pools.get(id).cloned()
    }

    pub fn profile_count(&self) -> usize {
        self.lock().profiles.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

/// A provider over `cloud` with the default poll interval
pub fn provider(cloud: FakeCloud) -> CloudProvider<FakeCloud> {
    let config = ProviderConfig {
        endpoint: "http://cloud.test".to_string(),
        project_id: "1".to_string(),
        region_id: "1".to_string(),
        ..Default::default()
    };
    CloudProvider::new(cloud, config)
}

fn missing(what: &str, id: &str) -> ClientError {
    ClientError::not_found(format!("{} {}", what, id))
}

fn interface_label(interface: &InterfaceSpec) -> &str {
    interface
        .subnet_id
        .as_deref()
        .or(interface.network_id.as_deref())
        .unwrap_or(interface.kind.as_str())
}

#[async_trait]
impl TaskClient for FakeCloud {
    async fn get_task(&self, id: &TaskId) -> ClientResult<Task> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| missing("task", id.as_str()))?;

        if task.polls_left > 0 {
            task.polls_left -= 1;
            return Ok(Task::new(id.clone(), TaskStatus::Running));
        }
        if let Some(message) = &task.failure {
            return Ok(Task::new(id.clone(), TaskStatus::Error).with_error(message.clone()));
        }

        let finished = Task::new(id.clone(), TaskStatus::Finished).with_created(task.created.clone());
        if let Some(effect) = task.effect.take() {
            effect(&mut *inner);
        }
        Ok(finished)
    }
}

#[async_trait]
impl InstanceApi for FakeCloud {
    async fn create_instance(&self, request: &InstanceCreate) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        inner.record(format!("create_instance {}", request.name));
        let id = inner.next("inst");
        let instance = Instance {
            id: id.clone(),
            name: request.name.clone(),
            flavor: request.flavor.clone(),
            image_id: request.image_id.clone(),
            keypair_name: request.keypair_name.clone(),
            status: "ACTIVE".to_string(),
            interfaces: request.interfaces.clone(),
            metadata: request.metadata.clone(),
        };
        let created = CreatedResources::new().with("instances", id.clone());
        Ok(inner.start("create_instance", created, move |inner| {
            inner.instances.insert(id, instance);
        }))
    }

    async fn get_instance(&self, id: &str) -> ClientResult<Instance> {
        self.instance(id).ok_or_else(|| missing("instance", id))
    }

    async fn delete_instance(&self, id: &str) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        if !inner.instances.contains_key(id) {
            return Err(missing("instance", id));
        }
        inner.record(format!("delete_instance {}", id));
        let id = id.to_string();
        Ok(inner.start("delete_instance", CreatedResources::new(), move |inner| {
            inner.instances.remove(&id);
        }))
    }

    async fn attach_interface(&self, id: &str, interface: &InterfaceSpec) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        if !inner.instances.contains_key(id) {
            return Err(missing("instance", id));
        }
        inner.record(format!("attach_interface {} {}", id, interface_label(interface)));
        let (id, interface) = (id.to_string(), interface.clone());
        Ok(inner.start("attach_interface", CreatedResources::new(), move |inner| {
            if let Some(instance) = inner.instances.get_mut(&id) {
                instance.interfaces.push(interface);
            }
        }))
    }

    async fn detach_interface(&self, id: &str, interface: &InterfaceSpec) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        if !inner.instances.contains_key(id) {
            return Err(missing("instance", id));
        }
        inner.record(format!("detach_interface {} {}", id, interface_label(interface)));
        let (id, interface) = (id.to_string(), interface.clone());
        Ok(inner.start("detach_interface", CreatedResources::new(), move |inner| {
            if let Some(instance) = inner.instances.get_mut(&id) {
                instance.interfaces.retain(|i| i != &interface);
            }
        }))
    }

    async fn set_metadata(&self, id: &str, items: &BTreeMap<String, String>) -> ClientResult<()> {
        let mut inner = self.lock();
        let keys: Vec<&str> = items.keys().map(String::as_str).collect();
        let call = format!("set_metadata {} {}", id, keys.join(","));
        inner.record(call);
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| missing("instance", id))?;
        instance
            .metadata
            .extend(items.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete_metadata_item(&self, id: &str, key: &str) -> ClientResult<()> {
        let mut inner = self.lock();
        inner.record(format!("delete_metadata_item {} {}", id, key));
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| missing("instance", id))?;
        instance.metadata.remove(key);
        Ok(())
    }
}

fn rule_label(rule: &RuleSpec) -> String {
    match rule.port_range_min {
        Some(port) => format!("{}/{}", rule.protocol, port),
        None => format!("{}/any", rule.protocol),
    }
}

#[async_trait]
impl SecurityGroupApi for FakeCloud {
    async fn create_security_group(
        &self,
        request: &SecurityGroupCreate,
    ) -> ClientResult<SecurityGroup> {
        let mut inner = self.lock();
        inner.record(format!("create_security_group {}", request.name));
        let id = inner.next("sg");
        let rules = request
            .rules
            .iter()
            .map(|spec| Rule {
                id: inner.next("rule"),
                spec: spec.clone(),
            })
            .collect();
        let group = SecurityGroup {
            id: id.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            rules,
        };
        inner.groups.insert(id, group.clone());
        Ok(group)
    }

    async fn get_security_group(&self, id: &str) -> ClientResult<SecurityGroup> {
        self.lock()
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| missing("security group", id))
    }

    async fn update_security_group(
        &self,
        id: &str,
        request: &SecurityGroupUpdate,
    ) -> ClientResult<SecurityGroup> {
        let mut inner = self.lock();
        inner.record(format!("update_security_group {}", id));
        let group = inner
            .groups
            .get_mut(id)
            .ok_or_else(|| missing("security group", id))?;
        group.name = request.name.clone();
        group.description = request.description.clone();
        Ok(group.clone())
    }

    async fn delete_security_group(&self, id: &str) -> ClientResult<()> {
        let mut inner = self.lock();
        inner
            .groups
            .remove(id)
            .ok_or_else(|| missing("security group", id))?;
        inner.record(format!("delete_security_group {}", id));
        Ok(())
    }

    async fn add_rule(&self, group_id: &str, rule: &RuleSpec) -> ClientResult<Rule> {
        let mut inner = self.lock();
        inner.record(format!("add_rule {} {}", group_id, rule_label(rule)));
        let rule = Rule {
            id: inner.next("rule"),
            spec: rule.clone(),
        };
        let group = inner
            .groups
            .get_mut(group_id)
            .ok_or_else(|| missing("security group", group_id))?;
        group.rules.push(rule.clone());
        Ok(rule)
    }

    async fn replace_rule(
        &self,
        group_id: &str,
        rule_id: &str,
        rule: &RuleSpec,
    ) -> ClientResult<Rule> {
        if !self.rule_replace {
            return Err(ClientError::Status {
                code: 405,
                message: "rule replace not supported".to_string(),
            });
        }
        let mut inner = self.lock();
        inner.record(format!("replace_rule {} {}", group_id, rule_id));
        let group = inner
            .groups
            .get_mut(group_id)
            .ok_or_else(|| missing("security group", group_id))?;
        let existing = group
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| missing("rule", rule_id))?;
        existing.spec = rule.clone();
        Ok(existing.clone())
    }

    async fn delete_rule(&self, rule_id: &str) -> ClientResult<()> {
        let mut inner = self.lock();
        inner.record(format!("delete_rule {}", rule_id));
        let group = inner
            .groups
            .values_mut()
            .find(|g| g.rules.iter().any(|r| r.id == rule_id))
            .ok_or_else(|| missing("rule", rule_id))?;
        group.rules.retain(|r| r.id != rule_id);
        Ok(())
    }

    fn supports_rule_replace(&self) -> bool {
        self.rule_replace
    }
}

#[async_trait]
impl LoadBalancerApi for FakeCloud {
    async fn create_pool(&self, request: &PoolCreate) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        inner.record(format!("create_pool {}", request.name));
        let id = inner.next("pool");
        let members = request
            .members
            .iter()
            .map(|spec| Member {
                id: inner.next("member"),
                spec: spec.clone(),
            })
            .collect();
        let pool = Pool {
            id: id.clone(),
            name: request.name.clone(),
            loadbalancer_id: request.loadbalancer_id.clone(),
            protocol: request.protocol.clone(),
            lb_algorithm: request.lb_algorithm.clone(),
            members,
        };
        let created = CreatedResources::new().with("lb_pools", id.clone());
        Ok(inner.start("create_pool", created, move |inner| {
            inner.pools.insert(id, pool);
        }))
    }

    async fn get_pool(&self, id: &str) -> ClientResult<Pool> {
        self.pool(id).ok_or_else(|| missing("pool", id))
    }

    async fn delete_pool(&self, id: &str) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        if !inner.pools.contains_key(id) {
            return Err(missing("pool", id));
        }
        inner.record(format!("delete_pool {}", id));
        let id = id.to_string();
        Ok(inner.start("delete_pool", CreatedResources::new(), move |inner| {
            inner.pools.remove(&id);
        }))
    }

    async fn add_member(&self, pool_id: &str, member: &MemberSpec) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        if !inner.pools.contains_key(pool_id) {
            return Err(missing("pool", pool_id));
        }
        inner.record(format!(
            "add_member {} {}:{}",
            pool_id, member.address, member.protocol_port
        ));
        let member = Member {
            id: inner.next("member"),
            spec: member.clone(),
        };
        let pool_id = pool_id.to_string();
        Ok(inner.start("add_member", CreatedResources::new(), move |inner| {
            if let Some(pool) = inner.pools.get_mut(&pool_id) {
                pool.members.push(member);
            }
        }))
    }

    async fn remove_member(&self, pool_id: &str, member_id: &str) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        let known = inner
            .pools
            .get(pool_id)
            .is_some_and(|p| p.members.iter().any(|m| m.id == member_id));
        if !known {
            return Err(missing("member", member_id));
        }
        inner.record(format!("remove_member {} {}", pool_id, member_id));
        let (pool_id, member_id) = (pool_id.to_string(), member_id.to_string());
        Ok(inner.start("remove_member", CreatedResources::new(), move |inner| {
            if let Some(pool) = inner.pools.get_mut(&pool_id) {
                pool.members.retain(|m| m.id != member_id);
            }
        }))
    }
}

#[async_trait]
impl DdosApi for FakeCloud {
    async fn create_ddos_profile(&self, request: &DdosProfileCreate) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        inner.record(format!("create_ddos_profile {}", request.ip_address));
        let id = inner.next("ddos");
        let profile = DdosProfile {
            id: id.clone(),
            ip_address: request.ip_address.clone(),
            profile_template: request.profile_template,
            active: false,
        };
        let created = CreatedResources::new().with("ddos_profiles", id.clone());
        Ok(inner.start("create_ddos_profile", created, move |inner| {
            inner.profiles.insert(id, profile);
        }))
    }

    async fn get_ddos_profile(&self, id: &str) -> ClientResult<DdosProfile> {
        self.lock()
            .profiles
            .get(id)
            .cloned()
            .ok_or_else(|| missing("ddos profile", id))
    }

    async fn activate_ddos_profile(&self, id: &str) -> ClientResult<TaskId> {
        self.set_active("activate_ddos_profile", id, true)
    }

    async fn deactivate_ddos_profile(&self, id: &str) -> ClientResult<TaskId> {
        self.set_active("deactivate_ddos_profile", id, false)
    }

    async fn delete_ddos_profile(&self, id: &str) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        if !inner.profiles.contains_key(id) {
            return Err(missing("ddos profile", id));
        }
        inner.record(format!("delete_ddos_profile {}", id));
        let id = id.to_string();
        Ok(inner.start("delete_ddos_profile", CreatedResources::new(), move |inner| {
            inner.profiles.remove(&id);
        }))
    }
}

impl FakeCloud {
    fn set_active(&self, operation: &str, id: &str, active: bool) -> ClientResult<TaskId> {
        let mut inner = self.lock();
        if !inner.profiles.contains_key(id) {
            return Err(missing("ddos profile", id));
        }
        inner.record(format!("{} {}", operation, id));
        let id = id.to_string();
        Ok(inner.start(operation, CreatedResources::new(), move |inner| {
            if let Some(profile) = inner.profiles.get_mut(&id) {
                profile.active = active;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_settles_then_applies_effect() {
        let cloud = FakeCloud::new();
        let request = PoolCreate {
            name: "web".to_string(),
            loadbalancer_id: "lb-1".to_string(),
            protocol: "HTTP".to_string(),
            lb_algorithm: "ROUND_ROBIN".to_string(),
            members: vec![],
        };
        let task_id = cloud.create_pool(&request).await.unwrap();

        let first = cloud.get_task(&task_id).await.unwrap();
        assert_eq!(first.state, TaskStatus::Running);
        assert!(first.created_resources.is_none());

        let done = cloud.get_task(&task_id).await.unwrap();
        assert_eq!(done.state, TaskStatus::Finished);
        let pool_id = done.created_id("lb_pools").unwrap().to_string();
        assert!(cloud.pool(&pool_id).is_some());
    }

    #[tokio::test]
    async fn failed_task_reports_error() {
        let cloud = FakeCloud::new();
        cloud.fail_task("create_pool", "quota exceeded");
        let request = PoolCreate {
            name: "web".to_string(),
            loadbalancer_id: "lb-1".to_string(),
            protocol: "HTTP".to_string(),
            lb_algorithm: "ROUND_ROBIN".to_string(),
            members: vec![],
        };
        let task_id = cloud.create_pool(&request).await.unwrap();
        cloud.get_task(&task_id).await.unwrap();

        let task = cloud.get_task(&task_id).await.unwrap();
        assert_eq!(task.state, TaskStatus::Error);
        assert_eq!(task.error.as_deref(), Some("quota exceeded"));
        assert!(cloud.lock().pools.is_empty());
    }
}
