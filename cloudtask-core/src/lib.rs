//! Cloudtask Core
//!
//! Shared machinery for a cloud provider whose mutating calls return task IDs:
//! the task model, a bounded task waiter, and collection reconciliation.

pub mod client;
pub mod provider;
pub mod reconcile;
pub mod resource;
pub mod task;
pub mod waiter;

pub use client::{ClientError, ClientResult, TaskClient, TaskResponse};
pub use reconcile::{reconcile, reconcile_maps, reconcile_values, reconcile_with_changes};
pub use task::{CreatedResources, Task, TaskId, TaskStatus};
pub use waiter::{Extracted, TaskWaiter, WaitError, WaitResult, WaitSpec};
