use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::{TaskError, panic_message};

type Job = Box<dyn FnOnce() -> Result<(), TaskError> + Send + 'static>;

/// A unit of work a script thread hands to the scheduler.
///
/// Tasks are created per call, executed at most once and dropped afterwards.
pub struct Task {
    job: Job,
}

/// Receiving side of a task created with [`Task::with_result`]
pub struct TaskResult<R> {
    slot: Arc<Mutex<Option<Result<R, TaskError>>>>,
}

impl Task {
    /// Wrap a closure whose return value is handed back through a [`TaskResult`]
    pub fn with_result<R, F>(f: F) -> (Self, TaskResult<R>)
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let writer = slot.clone();
        let task = Self {
            job: Box::new(move || {
                let outcome = catch_unwind(AssertUnwindSafe(f))
                    .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
                match outcome {
                    Ok(value) => {
                        *writer.lock() = Some(Ok(value));
                        Ok(())
                    }
                    Err(err) => {
                        *writer.lock() = Some(Err(err.clone()));
                        Err(err)
                    }
                }
            }),
        };
        (task, TaskResult { slot })
    }

    /// Execute the task on the current thread. Panics are caught and returned.
    pub fn run(self) -> Result<(), TaskError> {
        (self.job)()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

impl<R> TaskResult<R> {
    /// Collect the outcome. A task that never ran yields [`TaskError::Dropped`].
    pub fn take(self) -> Result<R, TaskError> {
        self.slot.lock().take().unwrap_or(Err(TaskError::Dropped))
    }
}

/// FIFO of tasks submitted by the unit that currently holds the turn
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub(crate) fn push(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    pub(crate) fn pop(&self) -> Option<Task> {
        self.tasks.lock().pop_front()
    }

    /// Drop everything still queued, returning how many tasks were discarded
    pub(crate) fn discard(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let count = tasks.len();
        tasks.clear();
        count
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
