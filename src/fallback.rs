//! Fallback plans: ordered alternatives with per-entry retry and backoff.
//!
//! A plan tries its entries in order until one succeeds. Each entry retries
//! itself according to its [`RetryStrategy`], sleeping for whatever its
//! [`BackoffStrategy`] asks between attempts. Entries may be plans
//! themselves; nested plans share the caller's [`FallbackSession`], so
//! attempt numbering continues across levels.

use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::error::Error;
use crate::execute::Executable;
use crate::executor::Executor;
use crate::response::Response;
use crate::retry::{BackoffStrategy, RetryStrategy};

const ERROR_STATUS_FLOOR: u16 = 400;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FallbackSession {
    groups: Vec<usize>,
    attempt: usize,
}

impl FallbackSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nesting depth; zero outside any plan.
    pub fn depth(&self) -> usize {
        self.groups.len()
    }

    pub fn attempt_number(&self) -> usize {
        self.attempt
    }

    pub fn groups(&self) -> &[usize] {
        &self.groups
    }

    /// Dot-joined entry counters followed by the attempt number, e.g. `1.2 (3)`.
    pub fn nested_attempt_description(&self) -> String {
        let groups = self
            .groups
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(".");
        format!("{groups} ({})", self.attempt)
    }

    fn enter(&mut self) {
        self.groups.push(0);
        self.attempt = 0;
    }

    /// Leaves the attempt number at the nested count; the enclosing entry
    /// retries against it.
    fn leave(&mut self) {
        self.groups.pop();
    }

    fn next_entry(&mut self) {
        if let Some(counter) = self.groups.last_mut() {
            *counter += 1;
        }
    }

    fn next_attempt(&mut self) {
        self.attempt += 1;
    }
}

#[derive(Clone)]
pub struct FallbackEntry {
    executable: Arc<dyn Executable>,
    retry_on_error_response: bool,
    retry: RetryStrategy,
    backoff: BackoffStrategy,
}

impl FallbackEntry {
    pub fn new(executable: impl Executable + 'static) -> Self {
        Self::from_arc(Arc::new(executable))
    }

    pub fn from_arc(executable: Arc<dyn Executable>) -> Self {
        Self {
            executable,
            retry_on_error_response: false,
            retry: RetryStrategy::default(),
            backoff: BackoffStrategy::default(),
        }
    }

    /// Treat statuses of 400 and above as failures.
    pub fn retry_on_error_response(mut self, enabled: bool) -> Self {
        self.retry_on_error_response = enabled;
        self
    }

    pub fn retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retries_on_error_response(&self) -> bool {
        self.retry_on_error_response
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry
    }

    pub fn backoff_strategy(&self) -> &BackoffStrategy {
        &self.backoff
    }
}

impl std::fmt::Debug for FallbackEntry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FallbackEntry")
            .field("retry_on_error_response", &self.retry_on_error_response)
            .field("retry", &self.retry)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default)]
pub struct FallbackPlan {
    entries: Vec<FallbackEntry>,
    default_retry: RetryStrategy,
    default_backoff: BackoffStrategy,
    executor: Option<Arc<dyn Executor>>,
}

impl FallbackPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strategies used by [`FallbackPlan::try_request`] for entries added
    /// afterwards.
    pub fn with_default_strategies(mut self, retry: RetryStrategy, backoff: BackoffStrategy) -> Self {
        self.default_retry = retry;
        self.default_backoff = backoff;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn try_request(self, executable: impl Executable + 'static) -> Self {
        let entry = FallbackEntry::new(executable)
            .retry(self.default_retry.clone())
            .backoff(self.default_backoff.clone());
        self.try_entry(entry)
    }

    pub fn try_request_with(
        self,
        executable: impl Executable + 'static,
        retry_on_error_response: bool,
        retry: RetryStrategy,
        backoff: BackoffStrategy,
    ) -> Self {
        self.try_entry(
            FallbackEntry::new(executable)
                .retry_on_error_response(retry_on_error_response)
                .retry(retry)
                .backoff(backoff),
        )
    }

    pub fn try_entry(mut self, entry: FallbackEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[FallbackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn run_entries(&self, session: &mut FallbackSession) -> crate::Result<Response> {
        let mut attempts = 0_usize;
        let mut last_status = None;
        let mut last_error = None;

        for entry in &self.entries {
            session.next_entry();
            loop {
                session.next_attempt();
                attempts += 1;
                debug!(attempt = %session.nested_attempt_description(), "executing fallback attempt");

                match entry.executable.execute_within(session) {
                    Ok(response)
                        if !entry.retry_on_error_response
                            || response.status() < ERROR_STATUS_FLOOR =>
                    {
                        return Ok(response);
                    }
                    Ok(mut response) => {
                        let status = response.status();
                        debug!(
                            attempt = %session.nested_attempt_description(),
                            status,
                            "fallback attempt returned an error status"
                        );
                        response.discard();
                        last_status = Some(status);
                    }
                    Err(error) => {
                        if let Error::FallbackExhausted { last_status: nested, .. } = &error {
                            debug!(
                                attempt = %session.nested_attempt_description(),
                                "nested fallback plan exhausted"
                            );
                            if nested.is_some() {
                                last_status = *nested;
                            }
                        } else {
                            warn!(
                                attempt = %session.nested_attempt_description(),
                                error = %error,
                                "fallback attempt failed"
                            );
                        }
                        last_error = Some(error);
                    }
                }

                let attempt = session.attempt_number();
                if !entry.retry.should_retry(attempt) {
                    break;
                }
                let delay = entry.backoff.backoff(attempt);
                debug!(
                    attempt = %session.nested_attempt_description(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying fallback entry"
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
        }

        warn!(attempts, last_status, "fallback plan exhausted");
        Err(Error::FallbackExhausted {
            attempts,
            last_status,
            source: last_error.map(Box::new),
        })
    }
}

impl Executable for FallbackPlan {
    fn execute_within(&self, session: &mut FallbackSession) -> crate::Result<Response> {
        let span = info_span!("reqtree.fallback", depth = session.depth() + 1);
        let _entered = span.enter();
        session.enter();
        let result = self.run_entries(session);
        session.leave();
        result
    }

    fn executor(&self) -> Arc<dyn Executor> {
        match &self.executor {
            Some(executor) => Arc::clone(executor),
            None => crate::executor::default_executor(),
        }
    }
}

impl std::fmt::Debug for FallbackPlan {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FallbackPlan")
            .field("entries", &self.entries)
            .field("default_retry", &self.default_retry)
            .field("default_backoff", &self.default_backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::FallbackSession;

    #[test]
    fn description_joins_group_counters() {
        let mut session = FallbackSession::new();
        session.enter();
        session.next_entry();
        session.next_attempt();
        assert_eq!(session.nested_attempt_description(), "1 (1)");

        session.enter();
        session.next_entry();
        session.next_attempt();
        session.next_entry();
        session.next_attempt();
        assert_eq!(session.nested_attempt_description(), "1.2 (2)");

        session.leave();
        assert_eq!(session.nested_attempt_description(), "1 (2)");
        session.leave();
        assert_eq!(session.depth(), 0);
    }
}
