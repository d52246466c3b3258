//! Single logical application thread.
//!
//! All animation and effect-graph state is owned by one cooperative thread.
//! External entry points (frame timers, launchers) marshal work onto it
//! through an explicit task queue consumed by a dedicated thread; the timing
//! core itself never takes a lock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use crate::error::{CadenzaError, CadenzaResult};

enum Job {
    Task(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// Owner of the logical application thread and its task queue.
///
/// Dropping the handle shuts the thread down after draining queued tasks.
pub struct AppThread {
    tx: mpsc::Sender<Job>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AppThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppThread")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

impl AppThread {
    pub fn spawn() -> CadenzaResult<AppThread> {
        let (tx, rx) = mpsc::channel::<Job>();
        let (id_tx, id_rx) = mpsc::channel::<ThreadId>();

        let handle = thread::Builder::new()
            .name("cadenza-app".to_owned())
            .spawn(move || {
                let _ = id_tx.send(thread::current().id());
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Task(task) => {
                            // A panicking task must not take the application
                            // thread down with it.
                            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                                tracing::error!(
                                    payload = crate::error::panic_message(&*panic),
                                    "application-thread task panicked"
                                );
                            }
                        }
                        Job::Shutdown => break,
                    }
                }
            })
            .map_err(|e| CadenzaError::dispatch(format!("failed to spawn app thread: {e}")))?;

        let thread_id = id_rx
            .recv()
            .map_err(|_| CadenzaError::dispatch("app thread exited before reporting its id"))?;

        Ok(AppThread {
            tx,
            thread_id,
            handle: Some(handle),
        })
    }

    /// Whether the calling thread is the logical application thread.
    pub fn is_app_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Enqueue fire-and-forget work.
    pub fn run_later(&self, task: impl FnOnce() + Send + 'static) -> CadenzaResult<()> {
        self.tx
            .send(Job::Task(Box::new(task)))
            .map_err(|_| CadenzaError::dispatch("app thread is no longer running"))
    }

    /// Run `task` on the application thread and block for its result.
    ///
    /// Called from the application thread itself (i.e. from within another
    /// task), the closure runs inline instead of deadlocking on the queue.
    pub fn run_and_wait<R: Send + 'static>(
        &self,
        task: impl FnOnce() -> R + Send + 'static,
    ) -> CadenzaResult<R> {
        if self.is_app_thread() {
            return Ok(task());
        }

        let (result_tx, result_rx) = mpsc::channel::<R>();
        self.run_later(move || {
            let _ = result_tx.send(task());
        })?;
        result_rx
            .recv()
            .map_err(|_| CadenzaError::dispatch("app thread dropped the task before completion"))
    }
}

impl Drop for AppThread {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn run_and_wait_returns_value() {
        let app = AppThread::spawn().unwrap();
        let v = app.run_and_wait(|| 41 + 1).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn run_later_executes_in_order() {
        let app = AppThread::spawn().unwrap();
        let acc = Arc::new(AtomicU32::new(0));

        for i in 1..=3u32 {
            let acc = acc.clone();
            app.run_later(move || {
                // 1, then 12, then 123
                acc.store(acc.load(Ordering::SeqCst) * 10 + i, Ordering::SeqCst);
            })
            .unwrap();
        }

        let final_value = {
            let acc = acc.clone();
            app.run_and_wait(move || acc.load(Ordering::SeqCst)).unwrap()
        };
        assert_eq!(final_value, 123);
    }

    #[test]
    fn is_app_thread_is_true_inside_tasks_only() {
        let app = AppThread::spawn().unwrap();
        assert!(!app.is_app_thread());

        let app = Arc::new(app);
        let inner = app.clone();
        let inside = app.run_and_wait(move || inner.is_app_thread()).unwrap();
        assert!(inside);
    }

    #[test]
    fn panicking_task_does_not_kill_the_thread() {
        let app = AppThread::spawn().unwrap();
        app.run_later(|| panic!("boom")).unwrap();
        let v = app.run_and_wait(|| 7).unwrap();
        assert_eq!(v, 7);
    }
}
