//! Task module - the unit of work of the generation pipeline and its store.
//!
//! - `Task` is an immutable-by-convention snapshot: transitions clone it,
//!   change what they need, and hand the result to the store.
//! - The external status (`pending` / `completed` / `failed`) and the
//!   human-review flag are derived from the internal `Stage`, so a task can
//!   never be both failed and awaiting review.
//! - `TaskStore` serializes mutations per task; there is no cross-task lock.

pub mod store;
pub mod task;

pub use store::{compare_and_swap, InMemoryTaskStore, SharedTaskStore, StoreError, TaskMutator, TaskStore};
pub use task::{Stage, Task, TaskId, TaskRequest, TaskStatus, TaskView, Transition};
