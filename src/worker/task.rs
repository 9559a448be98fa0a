//! Bounded pool of reusable tasks for fire-and-forget jobs.
//!
//! Unlike [`WorkerPool`](super::WorkerPool), [`TaskPool::invoke`] never
//! sheds work: at capacity it yields to the scheduler and retries until a
//! worker frees up.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::lane::Lane;
use super::slot::{run_worker, Acquired, SlotTable};
use crate::config::LaneMode;

type Task<T> = Box<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct TaskPool<T: Send + 'static> {
    shared: Arc<TaskShared<T>>,
}

struct TaskShared<T> {
    table: SlotTable<T>,
    task: Task<T>,
}

impl<T: Send + 'static> TaskPool<T> {
    /// Pool running `task` on at most `max_workers` tasks.
    pub fn new<F, Fut>(max_workers: usize, task: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_lane(max_workers, LaneMode::Auto.resolve(), task)
    }

    pub fn with_lane<F, Fut>(max_workers: usize, lane: Lane, task: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            shared: Arc::new(TaskShared {
                table: SlotTable::new(max_workers.max(1), lane),
                task: Box::new(move |value| task(value).boxed()),
            }),
        }
    }

    /// Run the task with `value` on a pooled worker.
    ///
    /// Hands `value` back once the pool has been shut down.
    pub async fn invoke(&self, value: T) -> Result<(), T> {
        let table = &self.shared.table;
        loop {
            if table.is_stopping() {
                return Err(value);
            }
            match table.acquire().await {
                Some(Acquired::Idle(id)) => {
                    table.dispatch(id, value).await;
                    return Ok(());
                }
                Some(Acquired::Fresh(id)) => {
                    self.spawn_worker(id.index());
                    table.dispatch(id, value).await;
                    return Ok(());
                }
                None => tokio::task::yield_now().await,
            }
        }
    }

    /// Refuse further jobs and terminate idle workers. Busy workers exit
    /// after their current job.
    pub fn shutdown(&self) {
        let drained = self.shared.table.stop();
        tracing::debug!(drained, "task pool shut down");
    }

    pub fn workers_count(&self) -> usize {
        self.shared.table.live()
    }

    pub fn idle_count(&self) -> usize {
        self.shared.table.idle()
    }

    fn spawn_worker(&self, index: usize) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            run_worker(&shared.table, index, |value| (shared.task)(value)).await;
        });
    }
}

impl<T: Send + 'static> Clone for TaskPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for TaskPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("live", &self.shared.table.live())
            .field("idle", &self.shared.table.idle())
            .field("max_workers", &self.shared.table.max_workers())
            .finish()
    }
}
