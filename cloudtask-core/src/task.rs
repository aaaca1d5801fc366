//! Task - Asynchronous operation handles returned by mutating API calls

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a backend task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Status of a backend task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    New,
    Running,
    Finished,
    Error,
    /// Any status string this client does not know; treated as non-terminal
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    /// FINISHED and ERROR are final; everything else may still change
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::New => "NEW",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Error => "ERROR",
            TaskStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// References to resources a task created, keyed by resource kind
/// (e.g. "instances", "lb_pools").
///
/// Entries are bare ID strings for most kinds, but some kinds report
/// objects carrying an `id` field; both shapes are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreatedResources(BTreeMap<String, Vec<serde_json::Value>>);

impl CreatedResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.0
            .entry(kind.into())
            .or_default()
            .push(serde_json::Value::String(id.into()));
        self
    }

    /// All IDs reported for a resource kind, in backend order
    pub fn ids(&self, kind: &str) -> Vec<&str> {
        self.0
            .get(kind)
            .map(|entries| entries.iter().filter_map(entry_id).collect())
            .unwrap_or_default()
    }

    /// The first ID reported for a resource kind
    pub fn first(&self, kind: &str) -> Option<&str> {
        self.0.get(kind)?.iter().find_map(entry_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|entries| entries.is_empty())
    }
}

fn entry_id(entry: &serde_json::Value) -> Option<&str> {
    match entry {
        serde_json::Value::String(s) => Some(s.as_str()),
        serde_json::Value::Object(obj) => obj.get("id").and_then(|v| v.as_str()),
        _ => None,
    }
}

/// Raw task representation as returned by the task-status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskStatus,
    /// Backend error message, set when the task failed
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub created_resources: Option<CreatedResources>,
    /// Request payload echoed back by the backend
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, state: TaskStatus) -> Self {
        Self {
            id: id.into(),
            state,
            error: None,
            created_resources: None,
            data: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn with_created(mut self, created: CreatedResources) -> Self {
        self.created_resources = Some(created);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// First created ID of a kind, if the backend has reported one yet
    pub fn created_id(&self, kind: &str) -> Option<&str> {
        self.created_resources.as_ref()?.first(kind)
    }
}
