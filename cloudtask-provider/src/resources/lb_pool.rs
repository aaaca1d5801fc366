//! Load balancer pools
//!
//! Members are keyed by `(address, protocol_port)`. A member whose key stays
//! but whose weight changes is removed and added again, since the backend has
//! no member update call.

use std::collections::HashMap;

use log::{debug, info};

use cloudtask_core::provider::{ProviderError, ProviderResult, Timeouts};
use cloudtask_core::resource::{Attributes, Resource, ResourceId, State, Value};
use cloudtask_core::reconcile_with_changes;
use cloudtask_core::waiter::extract;

use super::{Handler, ensure_unchanged, fail, list_of_maps, map_int, map_str, required_str};
use crate::api::{LoadBalancerApi, MemberSpec, Pool, PoolCreate};

pub const NAME: &str = "lb_pool";
pub const TIMEOUTS: Timeouts = Timeouts::new(1200, 1200, 600);

const CREATED_KIND: &str = "lb_pools";
const DEFAULT_WEIGHT: u32 = 1;

const IMMUTABLE: &[&str] = &["name", "loadbalancer_id", "protocol", "lb_algorithm"];

/// A member as seen by reconciliation: equal when the specs are equal,
/// whatever the backend ID
#[derive(Debug, Clone)]
struct PoolMember {
    id: Option<String>,
    spec: MemberSpec,
}

impl PartialEq for PoolMember {
    fn eq(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

impl PoolMember {
    fn key(&self) -> (String, u16) {
        (self.spec.address.clone(), self.spec.protocol_port)
    }
}

fn parse_members(values: &[Value]) -> ProviderResult<Vec<MemberSpec>> {
    list_of_maps(values, "members")?
        .into_iter()
        .map(|map| {
            let address = map_str(map, "address")
                .ok_or_else(|| ProviderError::new("every member needs an address"))?;
            let port = map_int(map, "protocol_port")
                .ok_or_else(|| ProviderError::new(format!("member {} needs a protocol_port", address)))?;
            let protocol_port = u16::try_from(port).map_err(|_| {
                ProviderError::new(format!("member {} has invalid port {}", address, port))
            })?;
            let weight = match map_int(map, "weight") {
                None => DEFAULT_WEIGHT,
                Some(w) => u32::try_from(w).map_err(|_| {
                    ProviderError::new(format!("member {} has invalid weight {}", address, w))
                })?,
            };
            Ok(MemberSpec {
                address,
                protocol_port,
                weight,
            })
        })
        .collect()
}

fn member_value(id: &str, spec: &MemberSpec) -> Value {
    let mut map = HashMap::new();
    map.insert("id".to_string(), Value::string(id));
    map.insert("address".to_string(), Value::string(&spec.address));
    map.insert("protocol_port".to_string(), Value::Int(spec.protocol_port.into()));
    map.insert("weight".to_string(), Value::Int(spec.weight.into()));
    Value::Map(map)
}

fn to_state(id: ResourceId, pool: &Pool) -> State {
    let mut attributes = HashMap::new();
    attributes.insert("name".to_string(), Value::string(&pool.name));
    attributes.insert("loadbalancer_id".to_string(), Value::string(&pool.loadbalancer_id));
    attributes.insert("protocol".to_string(), Value::string(&pool.protocol));
    attributes.insert("lb_algorithm".to_string(), Value::string(&pool.lb_algorithm));
    attributes.insert(
        "members".to_string(),
        Value::List(pool.members.iter().map(|m| member_value(&m.id, &m.spec)).collect()),
    );
    State::existing(id, attributes).with_identifier(&pool.id)
}

pub(crate) async fn read<A: LoadBalancerApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: Option<&str>,
) -> ProviderResult<State> {
    let Some(identifier) = identifier else {
        return Ok(State::not_found(id.clone()));
    };

    match h.api.get_pool(identifier).await {
        Ok(pool) => Ok(to_state(id.clone(), &pool)),
        Err(e) if e.is_not_found() => Ok(State::not_found(id.clone())),
        Err(e) => Err(fail("cannot read lb pool", id)(e)),
    }
}

pub(crate) async fn create<A: LoadBalancerApi + ?Sized>(
    h: &Handler<'_, A>,
    resource: &Resource,
) -> ProviderResult<State> {
    let members = parse_members(resource.get_list("members"))
        .map_err(|e| e.for_resource(resource.id.clone()))?;
    let request = PoolCreate {
        name: required_str(resource, "name")?,
        loadbalancer_id: required_str(resource, "loadbalancer_id")?,
        protocol: required_str(resource, "protocol")?,
        lb_algorithm: required_str(resource, "lb_algorithm")?,
        members,
    };

    let task_id = h
        .api
        .create_pool(&request)
        .await
        .map_err(fail("cannot create lb pool", &resource.id))?;
    let pool_id = h
        .waiter()
        .wait_and_extract(&h.create_spec(task_id), extract::created(CREATED_KIND))
        .await
        .map_err(fail("cannot create lb pool", &resource.id))?;
    info!("created {} as {}", resource.id, pool_id);

    read(h, &resource.id, Some(&pool_id)).await
}

pub(crate) async fn update<A: LoadBalancerApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: &str,
    from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    ensure_unchanged(id, from, to, IMMUTABLE)?;

    let pool = h
        .api
        .get_pool(identifier)
        .await
        .map_err(fail("cannot read lb pool", id))?;
    let current: Vec<PoolMember> = pool
        .members
        .into_iter()
        .map(|m| PoolMember {
            id: Some(m.id),
            spec: m.spec,
        })
        .collect();
    let desired: Vec<PoolMember> = parse_members(to.get_list("members"))
        .map_err(|e| e.for_resource(id.clone()))?
        .into_iter()
        .map(|spec| PoolMember { id: None, spec })
        .collect();

    let (to_remove, to_add) =
        reconcile_with_changes(&current, &desired, PoolMember::key).flatten_replacements();
    debug!(
        "{}: {} member(s) to remove, {} to add",
        id,
        to_remove.len(),
        to_add.len()
    );

    for member in to_remove.iter().filter_map(|m| m.id.as_deref()) {
        let task_id = h
            .api
            .remove_member(identifier, member)
            .await
            .map_err(fail("cannot remove pool member", id))?;
        h.waiter()
            .wait_and_extract(&h.update_spec(task_id), extract::finished())
            .await
            .map_err(fail("cannot remove pool member", id))?;
    }

    for member in &to_add {
        let task_id = h
            .api
            .add_member(identifier, &member.spec)
            .await
            .map_err(fail("cannot add pool member", id))?;
        h.waiter()
            .wait_and_extract(&h.update_spec(task_id), extract::finished())
            .await
            .map_err(fail("cannot add pool member", id))?;
    }

    read(h, id, Some(identifier)).await
}

pub(crate) async fn delete<A: LoadBalancerApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: &str,
) -> ProviderResult<()> {
    let task_id = match h.api.delete_pool(identifier).await {
        Ok(task_id) => task_id,
        Err(e) if e.is_not_found() => {
            debug!("lb pool {} already deleted", identifier);
            return Ok(());
        }
        Err(e) => return Err(fail("cannot delete lb pool", id)(e)),
    };

    let api = h.api;
    h.waiter()
        .wait_for_deletion(&h.delete_spec(task_id), move || api.get_pool(identifier))
        .await
        .map_err(fail("cannot delete lb pool", id))?;
    info!("deleted {} ({})", id, identifier);
    Ok(())
}
