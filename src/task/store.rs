//! Task storage.
//!
//! Mutations go through [`TaskStore::update`] with a mutator that receives
//! the latest snapshot and returns the next one. The store applies it
//! atomically per task, refuses to touch terminal tasks, and checks the
//! retry-budget invariants before committing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::task::{Stage, Task, TaskId, TaskRequest};

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task {0} is finalized and can no longer change")]
    Terminal(TaskId),

    #[error("Task {id} is {actual}, expected {expected}")]
    InvalidTransition {
        id: TaskId,
        actual: Stage,
        expected: Stage,
    },

    #[error("Task {id} changed concurrently (expected version {expected}, found {found})")]
    VersionConflict { id: TaskId, expected: u64, found: u64 },

    #[error("Internal store error: {0}")]
    Internal(String),
}

/// Computes the next snapshot of a task from the latest one.
pub type TaskMutator<'a> = Box<dyn FnOnce(&Task) -> Result<Task, StoreError> + Send + 'a>;

/// Persistence of task state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Allocate a fresh id and store a queued task for `request`.
    async fn create(&self, request: TaskRequest) -> Result<Task, StoreError>;

    /// Latest snapshot of a task.
    async fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Apply `mutator` to the latest snapshot. Concurrent updates of the same
    /// task never interleave.
    async fn update(&self, id: TaskId, mutator: TaskMutator<'_>) -> Result<Task, StoreError>;

    /// Every task, most recently created first.
    async fn list(&self) -> Result<Vec<Task>, StoreError>;

    /// Drop a task. Used by retention, not by the pipeline.
    async fn delete(&self, id: TaskId) -> Result<(), StoreError>;
}

pub type SharedTaskStore = Arc<dyn TaskStore>;

/// Mutator that installs `next` only if nobody committed since the snapshot
/// it was derived from.
pub fn compare_and_swap(next: Task) -> TaskMutator<'static> {
    Box::new(move |current: &Task| {
        if current.version != next.version {
            return Err(StoreError::VersionConflict {
                id: current.id,
                expected: next.version,
                found: current.version,
            });
        }
        Ok(next)
    })
}

/// In-memory store. The map lock is only held for lookups; each task has
/// its own lock for mutations.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<Task>>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: TaskId) -> Result<Arc<Mutex<Task>>, StoreError> {
        let tasks = self.tasks.read().await;
        tasks.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn check_invariants(current: &Task, next: &Task) -> Result<(), StoreError> {
        if next.retry_count > next.request.max_retries {
            return Err(StoreError::Internal(format!(
                "task {} would exceed its retry budget ({} > {})",
                current.id, next.retry_count, next.request.max_retries
            )));
        }
        if next.retry_count < current.retry_count {
            return Err(StoreError::Internal(format!(
                "task {} retry count would decrease ({} -> {})",
                current.id, current.retry_count, next.retry_count
            )));
        }
        if next.request != current.request {
            return Err(StoreError::Internal(format!(
                "task {} request is immutable",
                current.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, request: TaskRequest) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        let mut id = TaskId::new();
        while tasks.contains_key(&id) {
            id = TaskId::new();
        }
        let task = Task::new(id, request);
        tasks.insert(id, Arc::new(Mutex::new(task.clone())));
        tracing::info!(task_id = %id, "Created task");
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let slot = self.slot(id).await?;
        let task = slot.lock().await;
        Ok(task.clone())
    }

    async fn update(&self, id: TaskId, mutator: TaskMutator<'_>) -> Result<Task, StoreError> {
        let slot = self.slot(id).await?;
        let mut current = slot.lock().await;

        if current.is_terminal() {
            return Err(StoreError::Terminal(id));
        }

        let mut next = mutator(&*current)?;
        Self::check_invariants(&*current, &next)?;

        next.id = current.id;
        next.created_at = current.created_at;
        next.version = current.version + 1;
        next.updated_at = Utc::now();
        *current = next;

        tracing::debug!(
            task_id = %id,
            stage = %current.stage,
            version = current.version,
            "Updated task"
        );
        Ok(current.clone())
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let slots: Vec<Arc<Mutex<Task>>> = {
            let tasks = self.tasks.read().await;
            tasks.values().cloned().collect()
        };

        let mut list = Vec::with_capacity(slots.len());
        for slot in slots {
            list.push(slot.lock().await.clone());
        }
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.remove(&id).is_some() {
            tracing::info!(task_id = %id, "Deleted task");
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }
}
