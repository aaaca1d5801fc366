//! DDoS protection profiles
//!
//! Creating a profile is two tasks: create, then activate. When activation
//! fails the new profile is deleted again so no inactive profile is left
//! behind, and the activation error is returned.

use std::collections::HashMap;

use log::{debug, info, warn};

use cloudtask_core::provider::{ProviderError, ProviderResult, Timeouts};
use cloudtask_core::resource::{Attributes, Resource, ResourceId, State, Value};
use cloudtask_core::waiter::extract;

use super::{Handler, ensure_unchanged, fail, required_str};
use crate::api::{DdosApi, DdosProfile, DdosProfileCreate};

pub const NAME: &str = "ddos_profile";
pub const TIMEOUTS: Timeouts = Timeouts::new(600, 600, 600);

const CREATED_KIND: &str = "ddos_profiles";

fn required_int(resource: &Resource, key: &str) -> ProviderResult<i64> {
    resource.get_int(key).ok_or_else(|| {
        ProviderError::new(format!("missing required attribute '{}'", key))
            .for_resource(resource.id.clone())
    })
}

fn wants_active(resource: &Resource) -> bool {
    resource.get_bool("active").unwrap_or(true)
}

fn to_state(id: ResourceId, profile: &DdosProfile) -> State {
    let mut attributes = HashMap::new();
    attributes.insert("ip_address".to_string(), Value::string(&profile.ip_address));
    attributes.insert("profile_template".to_string(), Value::Int(profile.profile_template));
    attributes.insert("active".to_string(), Value::Bool(profile.active));
    State::existing(id, attributes).with_identifier(&profile.id)
}

pub(crate) async fn read<A: DdosApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: Option<&str>,
) -> ProviderResult<State> {
    let Some(identifier) = identifier else {
        return Ok(State::not_found(id.clone()));
    };

    match h.api.get_ddos_profile(identifier).await {
        Ok(profile) => Ok(to_state(id.clone(), &profile)),
        Err(e) if e.is_not_found() => Ok(State::not_found(id.clone())),
        Err(e) => Err(fail("cannot read ddos profile", id)(e)),
    }
}

async fn activate<A: DdosApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: &str,
    active: bool,
) -> ProviderResult<()> {
    let (action, call) = if active {
        ("cannot activate ddos profile", h.api.activate_ddos_profile(identifier))
    } else {
        ("cannot deactivate ddos profile", h.api.deactivate_ddos_profile(identifier))
    };

    let task_id = call.await.map_err(fail(action, id))?;
    h.waiter()
        .wait_and_extract(&h.update_spec(task_id), extract::finished())
        .await
        .map_err(fail(action, id))
}

pub(crate) async fn create<A: DdosApi + ?Sized>(
    h: &Handler<'_, A>,
    resource: &Resource,
) -> ProviderResult<State> {
    let id = &resource.id;
    let request = DdosProfileCreate {
        ip_address: required_str(resource, "ip_address")?,
        profile_template: required_int(resource, "profile_template")?,
    };

    let task_id = h
        .api
        .create_ddos_profile(&request)
        .await
        .map_err(fail("cannot create ddos profile", id))?;
    let profile_id = h
        .waiter()
        .wait_and_extract(&h.create_spec(task_id), extract::created(CREATED_KIND))
        .await
        .map_err(fail("cannot create ddos profile", id))?;
    info!("created {} as {}", id, profile_id);

    if wants_active(resource)
        && let Err(e) = activate(h, id, &profile_id, true).await
    {
        warn!("{}: activation failed, deleting profile {}", id, profile_id);
        if let Err(rollback) = delete(h, id, &profile_id).await {
            warn!("{}: rollback of profile {} failed: {}", id, profile_id, rollback);
        }
        return Err(e);
    }

    read(h, id, Some(&profile_id)).await
}

pub(crate) async fn update<A: DdosApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: &str,
    from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    ensure_unchanged(id, from, to, &["ip_address"])?;
    if let Some(template) = to.get_int("profile_template")
        && from.get_int("profile_template") != Some(template)
    {
        return Err(ProviderError::new(
            "'profile_template' cannot be updated in place, delete and recreate",
        )
        .for_resource(id.clone()));
    }

    let active = wants_active(to);
    if from.get_bool("active") != Some(active) {
        debug!("{}: setting active = {}", id, active);
        activate(h, id, identifier, active).await?;
    }

    read(h, id, Some(identifier)).await
}

pub(crate) async fn delete<A: DdosApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: &str,
) -> ProviderResult<()> {
    let task_id = match h.api.delete_ddos_profile(identifier).await {
        Ok(task_id) => task_id,
        Err(e) if e.is_not_found() => {
            debug!("ddos profile {} already deleted", identifier);
            return Ok(());
        }
        Err(e) => return Err(fail("cannot delete ddos profile", id)(e)),
    };

    let api = h.api;
    h.waiter()
        .wait_for_deletion(&h.delete_spec(task_id), move || api.get_ddos_profile(identifier))
        .await
        .map_err(fail("cannot delete ddos profile", id))?;
    info!("deleted {} ({})", id, identifier);
    Ok(())
}
