//! Security groups and their rules
//!
//! The backend applies these calls synchronously, so nothing here waits on a
//! task. Rules are reconciled in two phases: rules that name a backend ID are
//! matched by that ID first, everything else is matched by content.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};

use cloudtask_core::provider::{ProviderError, ProviderResult, Timeouts};
use cloudtask_core::resource::{Attributes, Resource, ResourceId, State, Value};
use cloudtask_core::reconcile_with_changes;

use super::{Handler, fail, list_of_maps, map_int, map_str, optional_str, put_opt, required_str};
use crate::api::{
    Direction, Rule, RuleSpec, SecurityGroup, SecurityGroupApi, SecurityGroupCreate,
    SecurityGroupUpdate,
};

pub const NAME: &str = "security_group";
pub const TIMEOUTS: Timeouts = Timeouts::new(600, 600, 600);

const DEFAULT_ETHERTYPE: &str = "IPv4";
const DEFAULT_PROTOCOL: &str = "any";

/// A desired rule, with the backend ID when the configuration carries one
type DesiredRule = (Option<String>, RuleSpec);

fn parse_port(map: &HashMap<String, Value>, key: &str) -> ProviderResult<Option<u16>> {
    match map_int(map, key) {
        None => Ok(None),
        Some(port) => u16::try_from(port)
            .map(Some)
            .map_err(|_| ProviderError::new(format!("{} out of range: {}", key, port))),
    }
}

fn parse_rules(values: &[Value]) -> ProviderResult<Vec<DesiredRule>> {
    list_of_maps(values, "rules")?
        .into_iter()
        .map(|map| {
            let direction_name = map_str(map, "direction").unwrap_or_default();
            let direction = Direction::parse(&direction_name).ok_or_else(|| {
                ProviderError::new(format!(
                    "rule direction must be ingress or egress, got '{}'",
                    direction_name
                ))
            })?;
            let spec = RuleSpec {
                direction,
                ethertype: map_str(map, "ethertype").unwrap_or_else(|| DEFAULT_ETHERTYPE.to_string()),
                protocol: map_str(map, "protocol").unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
                port_range_min: parse_port(map, "port_range_min")?,
                port_range_max: parse_port(map, "port_range_max")?,
                remote_ip_prefix: map_str(map, "remote_ip_prefix"),
                description: map_str(map, "description"),
            };
            Ok((map_str(map, "id"), spec))
        })
        .collect()
}

fn rule_value(rule: &Rule) -> Value {
    let spec = &rule.spec;
    let mut map = HashMap::new();
    map.insert("id".to_string(), Value::string(&rule.id));
    map.insert("direction".to_string(), Value::string(spec.direction.as_str()));
    map.insert("ethertype".to_string(), Value::string(&spec.ethertype));
    map.insert("protocol".to_string(), Value::string(&spec.protocol));
    if let Some(port) = spec.port_range_min {
        map.insert("port_range_min".to_string(), Value::Int(port.into()));
    }
    if let Some(port) = spec.port_range_max {
        map.insert("port_range_max".to_string(), Value::Int(port.into()));
    }
    put_opt(&mut map, "remote_ip_prefix", spec.remote_ip_prefix.as_ref());
    put_opt(&mut map, "description", spec.description.as_ref());
    Value::Map(map)
}

fn to_state(id: ResourceId, group: &SecurityGroup) -> State {
    let mut attributes = HashMap::new();
    attributes.insert("name".to_string(), Value::string(&group.name));
    put_opt(&mut attributes, "description", group.description.as_ref());
    attributes.insert(
        "rules".to_string(),
        Value::List(group.rules.iter().map(rule_value).collect()),
    );
    State::existing(id, attributes).with_identifier(&group.id)
}

/// Calls needed to turn the current rules into the desired ones
#[derive(Debug, Default, PartialEq)]
pub struct RulePlan {
    pub to_delete: Vec<String>,
    pub to_replace: Vec<(String, RuleSpec)>,
    pub to_create: Vec<RuleSpec>,
}

impl RulePlan {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_replace.is_empty() && self.to_create.is_empty()
    }
}

/// Plan rule changes.
///
/// A desired rule whose ID matches a current rule claims it; content changes
/// on claimed rules become replacements (or delete + create when
/// `replace_supported` is false). Unclaimed rules on both sides, including
/// desired rules with a stale ID, are then matched by content.
pub fn plan_rules(current: &[Rule], desired: &[DesiredRule], replace_supported: bool) -> RulePlan {
    let claimed: Vec<Rule> = desired
        .iter()
        .filter_map(|(id, spec)| {
            let id = id.as_ref()?;
            current.iter().any(|r| &r.id == id).then(|| Rule {
                id: id.clone(),
                spec: spec.clone(),
            })
        })
        .collect();

    let by_id = reconcile_with_changes(current, &claimed, |r| r.id.clone());

    let mut plan = RulePlan::default();
    for change in by_id.to_change {
        if replace_supported {
            plan.to_replace.push((change.old.id, change.new.spec));
        } else {
            plan.to_delete.push(change.old.id);
            plan.to_create.push(change.new.spec);
        }
    }

    // Content matching counts copies: rules with equal content but distinct
    // backend IDs are separate objects.
    let unclaimed_desired: Vec<&RuleSpec> = desired
        .iter()
        .filter(|(id, _)| !id.as_ref().is_some_and(|id| claimed.iter().any(|r| &r.id == id)))
        .map(|(_, spec)| spec)
        .collect();
    let mut missing: BTreeMap<&RuleSpec, usize> = BTreeMap::new();
    for spec in &unclaimed_desired {
        *missing.entry(*spec).or_default() += 1;
    }

    for rule in &by_id.to_remove {
        match missing.get_mut(&rule.spec) {
            Some(n) if *n > 0 => *n -= 1,
            _ => plan.to_delete.push(rule.id.clone()),
        }
    }
    for spec in unclaimed_desired {
        if let Some(n) = missing.get_mut(spec).filter(|n| **n > 0) {
            *n -= 1;
            plan.to_create.push(spec.clone());
        }
    }

    plan
}

pub(crate) async fn read<A: SecurityGroupApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: Option<&str>,
) -> ProviderResult<State> {
    let Some(identifier) = identifier else {
        return Ok(State::not_found(id.clone()));
    };

    match h.api.get_security_group(identifier).await {
        Ok(group) => Ok(to_state(id.clone(), &group)),
        Err(e) if e.is_not_found() => Ok(State::not_found(id.clone())),
        Err(e) => Err(fail("cannot read security group", id)(e)),
    }
}

pub(crate) async fn create<A: SecurityGroupApi + ?Sized>(
    h: &Handler<'_, A>,
    resource: &Resource,
) -> ProviderResult<State> {
    let rules = parse_rules(resource.get_list("rules"))
        .map_err(|e| e.for_resource(resource.id.clone()))?;
    let request = SecurityGroupCreate {
        name: required_str(resource, "name")?,
        description: optional_str(resource, "description"),
        rules: rules.into_iter().map(|(_, spec)| spec).collect(),
    };

    let group = h
        .api
        .create_security_group(&request)
        .await
        .map_err(fail("cannot create security group", &resource.id))?;
    info!("created {} as {}", resource.id, group.id);

    Ok(to_state(resource.id.clone(), &group))
}

pub(crate) async fn update<A: SecurityGroupApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: &str,
    from: &State,
    to: &Resource,
) -> ProviderResult<State> {
    let name = required_str(to, "name")?;
    let description = optional_str(to, "description");
    if from.get_str("name") != Some(name.as_str()) || optional_str(from, "description") != description {
        h.api
            .update_security_group(identifier, &SecurityGroupUpdate { name, description })
            .await
            .map_err(fail("cannot update security group", id))?;
    }

    let current = h
        .api
        .get_security_group(identifier)
        .await
        .map_err(fail("cannot read security group", id))?;
    let desired = parse_rules(to.get_list("rules")).map_err(|e| e.for_resource(id.clone()))?;
    let plan = plan_rules(&current.rules, &desired, h.api.supports_rule_replace());
    debug!(
        "{}: {} rule(s) to delete, {} to replace, {} to create",
        id,
        plan.to_delete.len(),
        plan.to_replace.len(),
        plan.to_create.len()
    );

    for rule_id in &plan.to_delete {
        match h.api.delete_rule(rule_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("rule {} already deleted", rule_id),
            Err(e) => return Err(fail("cannot delete rule", id)(e)),
        }
    }
    for (rule_id, spec) in &plan.to_replace {
        h.api
            .replace_rule(identifier, rule_id, spec)
            .await
            .map_err(fail("cannot replace rule", id))?;
    }
    for spec in &plan.to_create {
        h.api
            .add_rule(identifier, spec)
            .await
            .map_err(fail("cannot add rule", id))?;
    }

    read(h, id, Some(identifier)).await
}

pub(crate) async fn delete<A: SecurityGroupApi + ?Sized>(
    h: &Handler<'_, A>,
    id: &ResourceId,
    identifier: &str,
) -> ProviderResult<()> {
    match h.api.delete_security_group(identifier).await {
        Ok(()) => {
            info!("deleted {} ({})", id, identifier);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!("security group {} already deleted", identifier);
            Ok(())
        }
        Err(e) => Err(fail("cannot delete security group", id)(e)),
    }
}
