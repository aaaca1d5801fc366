//! Backend API surface: request/response models and per-service traits
//!
//! Mutating calls that the backend runs asynchronously return a `TaskId`;
//! the handlers wait on it with `TaskWaiter`. Security groups are handled
//! synchronously by the backend, so that trait returns objects directly.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cloudtask_core::{ClientResult, TaskClient, TaskId};

// =============================================================================
// Instances
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    External,
    Subnet,
    AnySubnet,
    ReservedFixedIp,
}

impl InterfaceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "external" => Some(Self::External),
            "subnet" => Some(Self::Subnet),
            "any_subnet" => Some(Self::AnySubnet),
            "reserved_fixed_ip" => Some(Self::ReservedFixedIp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Subnet => "subnet",
            Self::AnySubnet => "any_subnet",
            Self::ReservedFixedIp => "reserved_fixed_ip",
        }
    }
}

/// Network attachment of an instance, compared by value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InterfaceSpec {
    #[serde(rename = "type")]
    pub kind: InterfaceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceCreate {
    pub name: String,
    pub flavor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keypair_name: Option<String>,
    pub interfaces: Vec<InterfaceSpec>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub flavor: String,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub keypair_name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait InstanceApi: TaskClient {
    async fn create_instance(&self, request: &InstanceCreate) -> ClientResult<TaskId>;

    async fn get_instance(&self, id: &str) -> ClientResult<Instance>;

    async fn delete_instance(&self, id: &str) -> ClientResult<TaskId>;

    async fn attach_interface(&self, id: &str, interface: &InterfaceSpec) -> ClientResult<TaskId>;

    async fn detach_interface(&self, id: &str, interface: &InterfaceSpec) -> ClientResult<TaskId>;

    /// Set (add or overwrite) metadata items; applied synchronously
    async fn set_metadata(&self, id: &str, items: &BTreeMap<String, String>) -> ClientResult<()>;

    async fn delete_metadata_item(&self, id: &str, key: &str) -> ClientResult<()>;
}

// =============================================================================
// Security groups
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingress" => Some(Self::Ingress),
            "egress" => Some(Self::Egress),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }
}

/// Content of a security group rule, without its backend ID
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleSpec {
    pub direction: Direction,
    pub ethertype: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(flatten)]
    pub spec: RuleSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityGroupCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityGroupUpdate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "security_group_rules")]
    pub rules: Vec<Rule>,
}

#[async_trait]
pub trait SecurityGroupApi: Send + Sync {
    async fn create_security_group(&self, request: &SecurityGroupCreate)
    -> ClientResult<SecurityGroup>;

    async fn get_security_group(&self, id: &str) -> ClientResult<SecurityGroup>;

    async fn update_security_group(
        &self,
        id: &str,
        request: &SecurityGroupUpdate,
    ) -> ClientResult<SecurityGroup>;

    async fn delete_security_group(&self, id: &str) -> ClientResult<()>;

    async fn add_rule(&self, group_id: &str, rule: &RuleSpec) -> ClientResult<Rule>;

    async fn replace_rule(&self, group_id: &str, rule_id: &str, rule: &RuleSpec)
    -> ClientResult<Rule>;

    async fn delete_rule(&self, rule_id: &str) -> ClientResult<()>;

    /// Whether `replace_rule` is available; otherwise changed rules are
    /// deleted and re-added
    fn supports_rule_replace(&self) -> bool {
        true
    }
}

// =============================================================================
// Load balancer pools
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberSpec {
    pub address: String,
    pub protocol_port: u16,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    #[serde(flatten)]
    pub spec: MemberSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolCreate {
    pub name: String,
    pub loadbalancer_id: String,
    pub protocol: String,
    pub lb_algorithm: String,
    pub members: Vec<MemberSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub loadbalancer_id: String,
    pub protocol: String,
    pub lb_algorithm: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

#[async_trait]
pub trait LoadBalancerApi: TaskClient {
    async fn create_pool(&self, request: &PoolCreate) -> ClientResult<TaskId>;

    async fn get_pool(&self, id: &str) -> ClientResult<Pool>;

    async fn delete_pool(&self, id: &str) -> ClientResult<TaskId>;

    async fn add_member(&self, pool_id: &str, member: &MemberSpec) -> ClientResult<TaskId>;

    async fn remove_member(&self, pool_id: &str, member_id: &str) -> ClientResult<TaskId>;
}

// =============================================================================
// DDoS protection profiles
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DdosProfileCreate {
    pub ip_address: String,
    pub profile_template: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdosProfile {
    pub id: String,
    pub ip_address: String,
    pub profile_template: i64,
    #[serde(default)]
    pub active: bool,
}

#[async_trait]
pub trait DdosApi: TaskClient {
    async fn create_ddos_profile(&self, request: &DdosProfileCreate) -> ClientResult<TaskId>;

    async fn get_ddos_profile(&self, id: &str) -> ClientResult<DdosProfile>;

    async fn activate_ddos_profile(&self, id: &str) -> ClientResult<TaskId>;

    async fn deactivate_ddos_profile(&self, id: &str) -> ClientResult<TaskId>;

    async fn delete_ddos_profile(&self, id: &str) -> ClientResult<TaskId>;
}

/// Everything the provider talks to
pub trait CloudApi: InstanceApi + SecurityGroupApi + LoadBalancerApi + DdosApi {}

impl<T> CloudApi for T where T: InstanceApi + SecurityGroupApi + LoadBalancerApi + DdosApi {}
