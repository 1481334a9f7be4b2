use super::cancel::{AbortFlag, RunOutcome};
use super::error::EngineError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
#[cfg(feature = "parallel")]
use std::sync::Arc;
use tracing::error;

pub type TaskResult<T> = Result<RunOutcome<T>, EngineError>;

/// Executes independent units of work (reconstruction runs, per-model enantiomer
/// resolution, pairwise reductions).
///
/// With the `parallel` feature tasks run on a rayon pool; without it they run inline at
/// submission. Either way a failure or panic inside a task is caught at the task
/// boundary, logged, and raises the shared abort flag so sibling tasks wind down.
#[derive(Clone)]
pub struct TaskPool {
    abort: AbortFlag,
    #[cfg(feature = "parallel")]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("aborted", &self.abort.is_raised())
            .finish()
    }
}

impl TaskPool {
    /// A pool backed by the global rayon thread pool.
    pub fn new(abort: AbortFlag) -> Self {
        Self {
            abort,
            #[cfg(feature = "parallel")]
            pool: None,
        }
    }

    /// A pool with its own `threads` workers.
    #[cfg(feature = "parallel")]
    pub fn with_threads(threads: usize, abort: AbortFlag) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("denss-worker-{i}"))
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build thread pool: {e}")))?;
        Ok(Self {
            abort,
            pool: Some(Arc::new(pool)),
        })
    }

    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    pub fn submit<T, F>(&self, name: impl Into<String>, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        let name = name.into();
        let (sender, receiver) = mpsc::channel();
        let job = {
            let name = name.clone();
            let abort = self.abort.clone();
            move || run_guarded(&name, &abort, task, sender)
        };

        #[cfg(feature = "parallel")]
        match &self.pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
        #[cfg(not(feature = "parallel"))]
        job();

        TaskHandle { name, receiver }
    }

    /// Joins handles in submission order.
    pub fn join_all<T>(handles: Vec<TaskHandle<T>>) -> Vec<TaskResult<T>> {
        handles.into_iter().map(TaskHandle::join).collect()
    }
}

fn run_guarded<T, F>(name: &str, abort: &AbortFlag, task: F, sender: Sender<TaskResult<T>>)
where
    F: FnOnce() -> TaskResult<T>,
{
    let result = match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(err)) => {
            error!(task = name, error = %err, "Task failed, aborting remaining work");
            abort.raise();
            Err(err)
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(task = name, reason = %reason, "Task panicked, aborting remaining work");
            abort.raise();
            Err(EngineError::WorkerFailed {
                task: name.to_string(),
                reason,
            })
        }
    };
    let _ = sender.send(result);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct TaskHandle<T> {
    name: String,
    receiver: Receiver<TaskResult<T>>,
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until the task finishes.
    pub fn join(self) -> TaskResult<T> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| {
                Err(EngineError::WorkerFailed {
                    task: self.name.clone(),
                    reason: "worker exited without reporting a result".to_string(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_are_joined_in_submission_order() {
        let pool = TaskPool::new(AbortFlag::new());
        let handles: Vec<_> = (0..8)
            .map(|i| pool.submit(format!("task {i}"), move || Ok(RunOutcome::Completed(i * i))))
            .collect();
        let results: Vec<i32> = TaskPool::join_all(handles)
            .into_iter()
            .map(|r| r.unwrap().completed().unwrap())
            .collect();
        assert_eq!(results, vec![0, 1, 4, 9, 16, 25, 36, 49]);
    }

    #[test]
    fn panicking_task_raises_abort_and_reports_failure() {
        let abort = AbortFlag::new();
        let pool = TaskPool::new(abort.clone());
        let handle = pool.submit("boom", || -> TaskResult<()> { panic!("kaboom") });
        let result = handle.join();
        assert!(matches!(
            result,
            Err(EngineError::WorkerFailed { ref reason, .. }) if reason == "kaboom"
        ));
        assert!(abort.is_raised());
    }

    #[test]
    fn failing_task_raises_abort() {
        let abort = AbortFlag::new();
        let pool = TaskPool::new(abort.clone());
        let handle = pool.submit("fail", || -> TaskResult<()> {
            Err(EngineError::Internal("bad".into()))
        });
        assert!(handle.join().is_err());
        assert!(abort.is_raised());
    }
}
