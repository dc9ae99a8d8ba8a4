//! Where asynchronous executions run.
//!
//! Nothing in the pipeline suspends mid-request: an async execution is the
//! blocking call handed to an [`Executor`] as one job.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::Error;
use crate::response::Response;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs every job on its own named OS thread.
#[derive(Debug)]
pub struct ThreadExecutor {
    name_prefix: String,
    spawned: AtomicUsize,
}

impl ThreadExecutor {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            spawned: AtomicUsize::new(0),
        }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("reqtree-worker")
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) {
        let index = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{index}", self.name_prefix);
        if let Err(error) = std::thread::Builder::new().name(name).spawn(job) {
            warn!(error = %error, "failed to spawn worker thread; job dropped");
        }
    }
}

/// Runs jobs on a tokio runtime's blocking pool.
#[derive(Clone, Debug)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) {
        drop(self.handle.spawn_blocking(job));
    }
}

/// Process-wide executor used when a request does not name one.
pub fn default_executor() -> Arc<dyn Executor> {
    static DEFAULT: OnceLock<Arc<dyn Executor>> = OnceLock::new();
    Arc::clone(DEFAULT.get_or_init(|| Arc::new(ThreadExecutor::default())))
}

/// Handle to an execution submitted to an [`Executor`].
///
/// Resolves to [`Error::Canceled`] if the job was dropped without running
/// or panicked.
#[derive(Debug)]
pub struct ResponseFuture {
    receiver: oneshot::Receiver<crate::Result<Response>>,
}

impl ResponseFuture {
    /// Blocks the current thread until the execution finishes. Must not be
    /// called from inside an async runtime.
    pub fn wait(self) -> crate::Result<Response> {
        self.receiver.blocking_recv().unwrap_or(Err(Error::Canceled))
    }
}

impl Future for ResponseFuture {
    type Output = crate::Result<Response>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(context)
            .map(|received| received.unwrap_or(Err(Error::Canceled)))
    }
}

pub(crate) fn submit<W>(executor: &dyn Executor, work: W) -> ResponseFuture
where
    W: FnOnce() -> crate::Result<Response> + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    executor.execute(Box::new(move || {
        let _ = sender.send(work());
    }));
    ResponseFuture { receiver }
}

pub(crate) fn submit_with_callbacks<W, S, F>(executor: &dyn Executor, work: W, on_success: S, on_failure: F)
where
    W: FnOnce() -> crate::Result<Response> + Send + 'static,
    S: FnOnce(Response) + Send + 'static,
    F: FnOnce(Error) + Send + 'static,
{
    executor.execute(Box::new(move || match work() {
        Ok(response) => on_success(response),
        Err(error) => on_failure(error),
    }));
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::{Executor, Job, ThreadExecutor, submit};
    use crate::error::{Error, ErrorCode};

    struct DroppingExecutor;

    impl Executor for DroppingExecutor {
        fn execute(&self, job: Job) {
            drop(job);
        }
    }

    #[test]
    fn thread_executor_runs_jobs_on_named_threads() {
        let executor = ThreadExecutor::new("test-pool");
        let (sender, receiver) = mpsc::channel();
        executor.execute(Box::new(move || {
            let name = std::thread::current().name().map(str::to_owned);
            let _ = sender.send(name);
        }));
        let name = receiver
            .recv()
            .expect("job should report")
            .expect("thread should be named");
        assert!(name.starts_with("test-pool-"), "{name}");
    }

    #[test]
    fn dropped_job_resolves_as_canceled() {
        let future = submit(&DroppingExecutor, || Err(Error::Canceled));
        let error = future.wait().expect_err("dropped job should cancel");
        assert_eq!(error.code(), ErrorCode::Canceled);
    }

    #[test]
    fn panicking_job_resolves_as_canceled() {
        let future = submit(&ThreadExecutor::new("panicky"), || panic!("worker blew up"));
        let error = future.wait().expect_err("panicking job should cancel");
        assert_eq!(error.code(), ErrorCode::Canceled);
    }
}
