//! Client - Seams to the backend's task and resource endpoints
//!
//! Implementations live outside this crate (an HTTP client, or an in-memory
//! fake in tests). The error kind is decided by the implementation from the
//! response status, so callers can branch on `NotFound` without inspecting text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{Task, TaskId};

/// Errors reported by a backend client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The requested object does not exist (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were rejected (HTTP 401/403)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success response
    #[error("request failed with status {code}: {message}")]
    Status { code: u16, message: String },

    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Body returned by mutating calls: the tasks the backend scheduled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    #[serde(default)]
    pub tasks: Vec<TaskId>,
}

impl TaskResponse {
    pub fn of(task_id: impl Into<TaskId>) -> Self {
        Self {
            tasks: vec![task_id.into()],
        }
    }

    /// The task to wait on; mutating calls schedule exactly one
    pub fn single(self) -> ClientResult<TaskId> {
        self.tasks
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Decode("response contained no task ID".to_string()))
    }
}

/// Read access to the task-status endpoint
#[async_trait]
pub trait TaskClient: Send + Sync {
    async fn get_task(&self, id: &TaskId) -> ClientResult<Task>;
}

#[async_trait]
impl<C: TaskClient + ?Sized> TaskClient for &C {
    async fn get_task(&self, id: &TaskId) -> ClientResult<Task> {
        (**self).get_task(id).await
    }
}

#[async_trait]
impl<C: TaskClient + ?Sized> TaskClient for Box<C> {
    async fn get_task(&self, id: &TaskId) -> ClientResult<Task> {
        (**self).get_task(id).await
    }
}
