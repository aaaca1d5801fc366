//! Resource - Representing resources and their state

use std::collections::HashMap;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// Resource type (e.g., "instance", "lb_pool")
    pub resource_type: String,
    /// Resource name (identifier in the host configuration)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert to JSON for display or request bodies
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::Number((*n).into()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Convert from JSON; nulls and floats without an integer value are dropped
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Value::Int),
            serde_json::Value::Array(arr) => {
                Some(Value::List(arr.iter().filter_map(Value::from_json).collect()))
            }
            serde_json::Value::Object(obj) => Some(Value::Map(
                obj.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
            serde_json::Value::Null => None,
        }
    }
}

/// Typed lookups over an attribute map
pub trait Attributes {
    fn attributes(&self) -> &HashMap<String, Value>;

    fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes().get(key).and_then(Value::as_str)
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.attributes().get(key).and_then(Value::as_int)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes().get(key).and_then(Value::as_bool)
    }

    fn get_list(&self, key: &str) -> &[Value] {
        self.attributes()
            .get(key)
            .and_then(Value::as_list)
            .unwrap_or(&[])
    }

    /// String entries of a map attribute; non-string values are skipped
    fn get_string_map(&self, key: &str) -> HashMap<String, String> {
        self.attributes()
            .get(key)
            .and_then(Value::as_map)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Desired state declared in configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

impl Attributes for Resource {
    fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

/// Current state fetched from the backend
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// Backend identifier (instance ID, pool ID, ...)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

impl Attributes for State {
    fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_attribute_lookups() {
        let mut metadata = HashMap::new();
        metadata.insert("env".to_string(), Value::string("prod"));
        metadata.insert("replicas".to_string(), Value::Int(3));

        let resource = Resource::new("instance", "web")
            .with_attribute("flavor", Value::string("g1-standard-1-2"))
            .with_attribute("cpu", Value::Int(2))
            .with_attribute("public", Value::Bool(true))
            .with_attribute("metadata", Value::Map(metadata));

        assert_eq!(resource.get_str("flavor"), Some("g1-standard-1-2"));
        assert_eq!(resource.get_int("cpu"), Some(2));
        assert_eq!(resource.get_bool("public"), Some(true));
        assert_eq!(resource.get_str("cpu"), None);
        assert!(resource.get_list("interfaces").is_empty());

        let map = resource.get_string_map("metadata");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn json_conversion() {
        let json = serde_json::json!({
            "name": "web",
            "ports": [80, 443],
            "gone": null,
            "opts": {"debug": false}
        });
        let value = Value::from_json(&json).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("name"), Some(&Value::string("web")));
        assert_eq!(
            map.get("ports"),
            Some(&Value::List(vec![Value::Int(80), Value::Int(443)]))
        );
        assert!(!map.contains_key("gone"));

        let back = value.to_json();
        assert_eq!(back["opts"]["debug"], serde_json::json!(false));
    }

    #[test]
    fn state_builders() {
        let id = ResourceId::new("lb_pool", "web");
        assert_eq!(id.to_string(), "lb_pool.web");

        let state = State::existing(id.clone(), HashMap::new()).with_identifier("pool-1");
        assert!(state.exists);
        assert_eq!(state.identifier.as_deref(), Some("pool-1"));
        assert!(!State::not_found(id).exists);
    }
}
