//! Waiter - Turn an asynchronous backend task into a bounded synchronous wait
//!
//! Mutating calls return a task ID. `TaskWaiter` polls the task-status
//! endpoint on a fixed interval until a caller-supplied extractor yields a
//! value, the task fails, or the wall-clock budget runs out. The backend task
//! itself is never cancelled; on timeout the caller simply stops waiting.

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::Instant;

use crate::client::{ClientError, ClientResult, TaskClient};
use crate::task::{Task, TaskId, TaskStatus};

/// Default delay between two polls of the same task
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Why a wait ended without a result
#[derive(Debug, Error)]
pub enum WaitError {
    /// Reading the task (or the target resource) failed; never retried here
    #[error("failed to poll task {task_id}: {source}")]
    Fetch {
        task_id: TaskId,
        #[source]
        source: ClientError,
    },

    /// The backend reported the task as failed
    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: TaskId, message: String },

    /// The budget elapsed while the task was still not extractable
    #[error("timed out after {}s waiting for task {task_id}", .timeout.as_secs())]
    Timeout {
        task_id: TaskId,
        timeout: Duration,
        /// What the last poll was still waiting for
        last_reason: Option<String>,
    },
}

impl WaitError {
    pub fn task_id(&self) -> &TaskId {
        match self {
            WaitError::Fetch { task_id, .. }
            | WaitError::TaskFailed { task_id, .. }
            | WaitError::Timeout { task_id, .. } => task_id,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

pub type WaitResult<T> = Result<T, WaitError>;

/// Parameters of one polling cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSpec {
    pub task_id: TaskId,
    /// Stop with `TaskFailed` as soon as the task reports ERROR
    pub throw_on_error: bool,
    pub timeout: Duration,
}

impl WaitSpec {
    pub fn new(task_id: impl Into<TaskId>, timeout_secs: u64) -> Self {
        Self {
            task_id: task_id.into(),
            throw_on_error: true,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Keep polling through an ERROR status instead of failing
    pub fn tolerate_errors(mut self) -> Self {
        self.throw_on_error = false;
        self
    }
}

/// Outcome of one extractor call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted<T> {
    Ready(T),
    /// Not available yet; the reason ends up in logs and the timeout error
    NotReady(String),
}

/// Polls tasks through a `TaskClient`
pub struct TaskWaiter<'a, C: ?Sized> {
    client: &'a C,
    poll_interval: Duration,
}

impl<'a, C: TaskClient + ?Sized> TaskWaiter<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll `spec.task_id` until `extract` returns `Ready`.
    ///
    /// The extractor runs on every poll, before the status is inspected, so a
    /// backend that publishes created IDs early lets the wait finish before
    /// the task turns FINISHED.
    pub async fn wait_and_extract<T, F>(&self, spec: &WaitSpec, mut extract: F) -> WaitResult<T>
    where
        F: FnMut(&Task) -> Extracted<T>,
    {
        let started = Instant::now();

        loop {
            let task = self.fetch(spec).await?;

            let reason = match extract(&task) {
                Extracted::Ready(value) => {
                    info!(
                        "task {} ready after {:?} (status {})",
                        spec.task_id,
                        started.elapsed(),
                        task.state
                    );
                    return Ok(value);
                }
                Extracted::NotReady(reason) => reason,
            };

            check_failed(spec, &task)?;
            self.pause(spec, started, reason).await?;
        }
    }

    /// Poll until the deleted resource is gone.
    ///
    /// `get` reads the target resource. `NotFound` means the delete completed,
    /// whatever the task says (the task record may already be purged). Any
    /// other error is returned as `Fetch`; a resource that still exists means
    /// the task is consulted for failure and the wait goes on. A task that is
    /// itself NotFound carries no failure information and does not end the wait.
    pub async fn wait_for_deletion<R, G, Fut>(&self, spec: &WaitSpec, mut get: G) -> WaitResult<()>
    where
        G: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<R>>,
    {
        let started = Instant::now();

        loop {
            match get().await {
                Err(e) if e.is_not_found() => {
                    info!(
                        "resource for task {} is gone after {:?}",
                        spec.task_id,
                        started.elapsed()
                    );
                    return Ok(());
                }
                Err(source) => {
                    return Err(WaitError::Fetch {
                        task_id: spec.task_id.clone(),
                        source,
                    });
                }
                Ok(_) => {}
            }

            let reason = match self.client.get_task(&spec.task_id).await {
                Ok(task) => {
                    check_failed(spec, &task)?;
                    format!("resource still exists (task {})", task.state)
                }
                Err(e) if e.is_not_found() => {
                    debug!("task {} record is gone, resource still present", spec.task_id);
                    "resource still exists (task record gone)".to_string()
                }
                Err(source) => {
                    return Err(WaitError::Fetch {
                        task_id: spec.task_id.clone(),
                        source,
                    });
                }
            };
            self.pause(spec, started, reason).await?;
        }
    }

    async fn fetch(&self, spec: &WaitSpec) -> WaitResult<Task> {
        self.client
            .get_task(&spec.task_id)
            .await
            .map_err(|source| WaitError::Fetch {
                task_id: spec.task_id.clone(),
                source,
            })
    }

    /// Sleep until the next poll, or fail once the budget is spent
    async fn pause(&self, spec: &WaitSpec, started: Instant, reason: String) -> WaitResult<()> {
        let elapsed = started.elapsed();
        if elapsed >= spec.timeout {
            warn!(
                "giving up on task {} after {:?}: {}",
                spec.task_id, elapsed, reason
            );
            return Err(WaitError::Timeout {
                task_id: spec.task_id.clone(),
                timeout: spec.timeout,
                last_reason: Some(reason),
            });
        }

        let delay = self.poll_interval.min(spec.timeout - elapsed);
        debug!("task {} not ready ({}), next poll in {:?}", spec.task_id, reason, delay);
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

fn check_failed(spec: &WaitSpec, task: &Task) -> WaitResult<()> {
    if task.state == TaskStatus::Error && spec.throw_on_error {
        let message = task
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        warn!("task {} failed: {}", spec.task_id, message);
        return Err(WaitError::TaskFailed {
            task_id: spec.task_id.clone(),
            message,
        });
    }
    Ok(())
}

/// Extractors for the common task shapes
pub mod extract {
    use super::Extracted;
    use crate::task::{Task, TaskStatus};

    /// First created ID of `kind`, as soon as the backend reports it
    pub fn created(kind: &'static str) -> impl FnMut(&Task) -> Extracted<String> + Send {
        move |task| match task.created_id(kind) {
            Some(id) => Extracted::Ready(id.to_string()),
            None => Extracted::NotReady(format!("no {} reported yet ({})", kind, task.state)),
        }
    }

    /// Every created ID of `kind`, once the task has finished
    pub fn created_all(kind: &'static str) -> impl FnMut(&Task) -> Extracted<Vec<String>> + Send {
        move |task| {
            if task.state != TaskStatus::Finished {
                return Extracted::NotReady(format!("task is {}", task.state));
            }
            let ids = task
                .created_resources
                .as_ref()
                .map(|c| c.ids(kind).into_iter().map(str::to_string).collect())
                .unwrap_or_default();
            Extracted::Ready(ids)
        }
    }

    /// Unit result once the task has finished
    pub fn finished() -> impl FnMut(&Task) -> Extracted<()> + Send {
        |task| {
            if task.state == TaskStatus::Finished {
                Extracted::Ready(())
            } else {
                Extracted::NotReady(format!("task is {}", task.state))
            }
        }
    }
}
