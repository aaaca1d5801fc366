//! Resource type definitions and the shared handler plumbing
//!
//! Each submodule owns one resource kind: its name, its wait budgets, the
//! mapping between attributes and API models, and its CRUD handlers.

pub mod ddos_profile;
pub mod instance;
pub mod lb_pool;
pub mod security_group;

use std::collections::HashMap;
use std::time::Duration;

use cloudtask_core::provider::{ProviderError, ProviderResult, ResourceType, Timeouts};
use cloudtask_core::resource::{Attributes, Resource, ResourceId, Value};
use cloudtask_core::{TaskClient, TaskId, TaskWaiter, WaitSpec};

// =============================================================================
// Resource Type Definitions
// =============================================================================

macro_rules! define_resource_type {
    ($name:ident, $type_name:expr, $timeouts:expr) => {
        pub struct $name;
        impl ResourceType for $name {
            fn name(&self) -> &'static str {
                $type_name
            }
            fn timeouts(&self) -> Timeouts {
                $timeouts
            }
        }
    };
}

define_resource_type!(InstanceType, instance::NAME, instance::TIMEOUTS);
define_resource_type!(SecurityGroupType, security_group::NAME, security_group::TIMEOUTS);
define_resource_type!(LbPoolType, lb_pool::NAME, lb_pool::TIMEOUTS);
define_resource_type!(DdosProfileType, ddos_profile::NAME, ddos_profile::TIMEOUTS);

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(InstanceType),
        Box::new(SecurityGroupType),
        Box::new(LbPoolType),
        Box::new(DdosProfileType),
    ]
}

/// Built-in wait budgets of a resource kind
pub fn default_timeouts(resource_type: &str) -> Option<Timeouts> {
    resource_types()
        .into_iter()
        .find(|t| t.name() == resource_type)
        .map(|t| t.timeouts())
}

// =============================================================================
// Handler Context
// =============================================================================

/// What a handler needs for one operation: the API and the wait policy
pub(crate) struct Handler<'a, A: ?Sized> {
    pub api: &'a A,
    pub poll_interval: Duration,
    pub timeouts: Timeouts,
}

impl<'a, A: TaskClient + ?Sized> Handler<'a, A> {
    pub fn waiter(&self) -> TaskWaiter<'a, A> {
        TaskWaiter::new(self.api).with_poll_interval(self.poll_interval)
    }

    pub fn create_spec(&self, task_id: TaskId) -> WaitSpec {
        WaitSpec::new(task_id, self.timeouts.create)
    }

    pub fn update_spec(&self, task_id: TaskId) -> WaitSpec {
        WaitSpec::new(task_id, self.timeouts.update)
    }

    pub fn delete_spec(&self, task_id: TaskId) -> WaitSpec {
        WaitSpec::new(task_id, self.timeouts.delete)
    }
}

// =============================================================================
// Attribute Helpers
// =============================================================================

/// Error mapper adding an action and the resource to a lower-level error
pub(crate) fn fail<E>(action: &str, id: &ResourceId) -> impl FnOnce(E) -> ProviderError + use<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let action = action.to_string();
    let id = id.clone();
    move |e| ProviderError::wrap(action, e).for_resource(id)
}

pub(crate) fn required_str(resource: &Resource, key: &str) -> ProviderResult<String> {
    resource.get_str(key).map(str::to_string).ok_or_else(|| {
        ProviderError::new(format!("missing required attribute '{}'", key))
            .for_resource(resource.id.clone())
    })
}

pub(crate) fn optional_str(attrs: &impl Attributes, key: &str) -> Option<String> {
    attrs.get_str(key).map(str::to_string)
}

pub(crate) fn map_str(map: &HashMap<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn map_int(map: &HashMap<String, Value>, key: &str) -> Option<i64> {
    map.get(key).and_then(Value::as_int)
}

/// Each entry of a list attribute as a map, or an error naming the attribute
pub(crate) fn list_of_maps<'v>(
    values: &'v [Value],
    attribute: &str,
) -> ProviderResult<Vec<&'v HashMap<String, Value>>> {
    values
        .iter()
        .map(|v| {
            v.as_map().ok_or_else(|| {
                ProviderError::new(format!("every '{}' entry must be a block", attribute))
            })
        })
        .collect()
}

/// Insert `Some` values only
pub(crate) fn put_opt(attrs: &mut HashMap<String, Value>, key: &str, value: Option<&String>) {
    if let Some(v) = value {
        attrs.insert(key.to_string(), Value::String(v.clone()));
    }
}

/// Reject changes to attributes the backend cannot update in place
pub(crate) fn ensure_unchanged(
    id: &ResourceId,
    from: &impl Attributes,
    to: &Resource,
    keys: &[&str],
) -> ProviderResult<()> {
    for key in keys {
        if let Some(wanted) = to.get_str(key)
            && from.get_str(key) != Some(wanted)
        {
            return Err(ProviderError::new(format!(
                "'{}' cannot be updated in place, delete and recreate",
                key
            ))
            .for_resource(id.clone()));
        }
    }
    Ok(())
}
