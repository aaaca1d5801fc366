//! Compute instances
//!
//! Interfaces are reconciled by value (detach removed, attach added, one task
//! per call); metadata is reconciled as a map with synchronous calls.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};

use cloudtask_core::provider::{ProviderError, ProviderResult, Timeouts};
use cloudtask_core::resource::{Attributes, Resource, ResourceId, State, Value};
use cloudtask_core::waiter::extract;
use cloudtask_core::{reconcile_maps, reconcile_values};

use super::{Handler, ensure_unchanged, fail, list_of_maps, map_str, optional_str, put_opt, required_str};
use crate::api::{Instance, InstanceApi, InstanceCreate, InterfaceKind, InterfaceSpec};

pub const NAME: &str = "instance";
pub const TIMEOUTS: Timeouts = Timeouts::new(1200, 1200, 1200);

/// Kind key of instance IDs in a task's created resources
const CREATED_KIND: &str = "instances";

const IMMUTABLE: &[&str] = &["name", "flavor", "image_id", "keypair_name"];

fn parse_interfaces(values: &[Value]) -> ProviderResult<Vec<InterfaceSpec>> {
    list_of_maps(values, "interfaces")?
        .into_iter()
        .map(|map| {
            let kind_name = map_str(map, "type").unwrap_or_else(|| "external".to_string());
            let kind = InterfaceKind::parse(&kind_name).ok_or_else(|| {
                ProviderError::new(format!("unknown interface type '{}'", kind_name))
            })?;
            Ok(InterfaceSpec {
                kind,
                network_id: map_str(map, "network_id"),
                subnet_id: map_str(map, "subnet_id"),
                port_id: map_str(map, "port_id"),
            })
        })
        .collect()
}

fn interface_value(interface: &InterfaceSpec) -> Value {
    let mut map = HashMap::new();
    map.insert(
        "type".to_string(),
        Value::string(interface.kind.as_str()),
    );
    put_opt(&mut map, "network_id", interface.network_id.as_ref());
    put_opt(&mut map, "subnet_id", interface.subnet_id.as_ref());
    put_opt(&mut map, "port_id", interface.port_id.as_ref());
    Value::Map(map)
}

fn build_request(resource: &Resource) -> ProviderResult<InstanceCreate> {
    let interfaces = parse_interfaces(resource.get_list("interfaces"))
        .map_err(|e| e.for_resource(resource.id.clone()))?;

    Ok(InstanceCreate {
        name: required_str(resource, "name")?,
        flavor: required_str(resource, "flavor")?,
        image_id: optional_str(resource, "image_id"),
        keypair_name: optional_str(resource, "keypair_name"),
        interfaces,
        metadata: resource.get_string_map("metadata").into_iter().collect(),
    })
}

fn to_state(id: ResourceId, instance: &Instance) -> State {
    let mut attributes = HashMap::new();
    attributes.insert("name".to_string(), Value::string(&instance.name));
    attributes.insert("flavor".to_string(), Value::string(&instance.flavor));
    attributes.insert("status".to_string(), Value::string(&instance.status));
    put_opt(&mut attributes, "image_id", instance.image_id.as_ref());
    put_opt(&mut attributes, "keypair_name", instance.keypair_name.as_ref());
    attributes.insert(
        "interfaces".to_string(),
        Value::List(instance.interfaces.iter().map(interface_value).collect()),
    );
    attributes.insert(
        "metadata".to_string(),
        Value::Map(
            instance
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), Value::string(v)))
                .collect(),
        ),
    );
    State::existing(id, attributes).with_identifier(&instance.id)
}

pub(crate) async fn read<A: InstanceApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: Option<&str>,
) -> ProviderResult<State> {
    let Some(identifier) = identifier else {
        return Ok(State::not_found(id.clone()));
    };

    match h.api.get_instance(identifier).await {
        Ok(instance) => Ok(to_state(id.clone(), &instance)),
        Err(e) if e.is_not_found() => Ok(State::not_found(id.clone())),
        Err(e) => Err(fail("cannot read instance", id)(e)),
    }
}

pub(crate) async fn create<A: InstanceApi + ?Sized>(
    h: &Handler<'_, A>,
    resource: &Resource,
) -> ProviderResult<State> {
    let request = build_request(resource)?;

    let task_id = h
        .api
        .create_instance(&request)
        .await
        .map_err(fail("cannot create instance", &resource.id))?;

    let instance_id = h
        .waiter()
        .wait_and_extract(&h.create_spec(task_id), extract::created(CREATED_KIND))
        .await
        .map_err(fail("cannot create instance", &resource.id))?;
    info!("created {} as {}", resource.id, instance_id);

    read(h, &resource.id, Some(&instance_id)).await
}

pub(crate) async fn update<A: InstanceApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: &str,
    from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    ensure_unchanged(id, from, to, IMMUTABLE)?;

    let old = parse_interfaces(from.get_list("interfaces")).map_err(|e| e.for_resource(id.clone()))?;
    let new = parse_interfaces(to.get_list("interfaces")).map_err(|e| e.for_resource(id.clone()))?;
    let (to_detach, to_attach) = reconcile_values(&old, &new);

    for interface in &to_detach {
        debug!("detaching {:?} interface from {}", interface.kind, identifier);
        let task_id = h
            .api
            .detach_interface(identifier, interface)
            .await
            .map_err(fail("cannot detach interface", id))?;
        h.waiter()
            .wait_and_extract(&h.update_spec(task_id), extract::finished())
            .await
            .map_err(fail("cannot detach interface", id))?;
    }

    for interface in &to_attach {
        debug!("attaching {:?} interface to {}", interface.kind, identifier);
        let task_id = h
            .api
            .attach_interface(identifier, interface)
            .await
            .map_err(fail("cannot attach interface", id))?;
        h.waiter()
            .wait_and_extract(&h.update_spec(task_id), extract::finished())
            .await
            .map_err(fail("cannot attach interface", id))?;
    }

    let metadata = reconcile_maps(&from.get_string_map("metadata"), &to.get_string_map("metadata"));
    for key in &metadata.to_delete {
        h.api
            .delete_metadata_item(identifier, key)
            .await
            .map_err(fail("cannot delete metadata", id))?;
    }
    if !metadata.to_set.is_empty() {
        let items: BTreeMap<String, String> = metadata.to_set.into_iter().collect();
        h.api
            .set_metadata(identifier, &items)
            .await
            .map_err(fail("cannot set metadata", id))?;
    }

    read(h, id, Some(identifier)).await
}

pub(crate) async fn delete<A: InstanceApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: &str,
) -> ProviderResult<()> {
    let task_id = match h.api.delete_instance(identifier).await {
        Ok(task_id) => task_id,
        Err(e) if e.is_not_found() => {
            debug!("instance {} already deleted", identifier);
            return Ok(());
        }
        Err(e) => return Err(fail("cannot delete instance", id)(e)),
    };

    let api = h.api;
    h.waiter()
        .wait_for_deletion(&h.delete_spec(task_id), move || api.get_instance(identifier))
        .await
        .map_err(fail("cannot delete instance", id))?;
    info!("deleted {} ({})", id, identifier);
    Ok(())
}
