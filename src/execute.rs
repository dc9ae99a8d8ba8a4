use std::sync::Arc;

use crate::error::Error;
use crate::executor::{Executor, ResponseFuture, default_executor, submit, submit_with_callbacks};
use crate::fallback::FallbackSession;
use crate::response::Response;

/// Anything that produces a [`Response`]: a single request or a whole
/// fallback plan. Plans hold their entries as `Arc<dyn Executable>`, so
/// plans nest inside plans.
pub trait Executable: Send + Sync {
    /// Runs inside an enclosing plan's session so nested attempts share its
    /// numbering.
    fn execute_within(&self, session: &mut FallbackSession) -> crate::Result<Response>;

    fn execute(&self) -> crate::Result<Response> {
        self.execute_within(&mut FallbackSession::new())
    }

    /// Executor used by the async variants that do not take one.
    fn executor(&self) -> Arc<dyn Executor> {
        default_executor()
    }

    fn execute_async<S, F>(&self, on_success: S, on_failure: F)
    where
        Self: Sized + Clone + 'static,
        S: FnOnce(Response) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        let executor = self.executor();
        self.execute_async_on(executor.as_ref(), on_success, on_failure);
    }

    fn execute_async_on<S, F>(&self, executor: &dyn Executor, on_success: S, on_failure: F)
    where
        Self: Sized + Clone + 'static,
        S: FnOnce(Response) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        let snapshot = self.clone();
        submit_with_callbacks(executor, move || snapshot.execute(), on_success, on_failure);
    }

    fn execute_future(&self) -> ResponseFuture
    where
        Self: Sized + Clone + 'static,
    {
        let executor = self.executor();
        self.execute_future_on(executor.as_ref())
    }

    fn execute_future_on(&self, executor: &dyn Executor) -> ResponseFuture
    where
        Self: Sized + Clone + 'static,
    {
        let snapshot = self.clone();
        submit(executor, move || snapshot.execute())
    }
}

impl<T> Executable for Arc<T>
where
    T: Executable + ?Sized,
{
    fn execute_within(&self, session: &mut FallbackSession) -> crate::Result<Response> {
        (**self).execute_within(session)
    }

    fn executor(&self) -> Arc<dyn Executor> {
        (**self).executor()
    }
}
