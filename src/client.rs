use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::body::FormFields;
use crate::config::{AdvancedConfig, ClientProfile, RequestDefaults};
use crate::executor::{Executor, default_executor};
use crate::fallback::FallbackPlan;
use crate::headers::Headers;
use crate::request::Request;
use crate::retry::{BackoffStrategy, RetryStrategy};
use crate::transport::{ConnectionProvider, UreqConnectionProvider, default_connection_provider};

#[derive(Clone)]
pub struct HttpSender {
    defaults: RequestDefaults,
    default_headers: Headers,
    retry: RetryStrategy,
    backoff: BackoffStrategy,
    provider: Arc<dyn ConnectionProvider>,
    executor: Arc<dyn Executor>,
}

pub struct HttpSenderBuilder {
    profile: ClientProfile,
    advanced: AdvancedConfig,
    default_headers: Headers,
    user_agent: Option<String>,
    provider: Option<Arc<dyn ConnectionProvider>>,
    executor: Option<Arc<dyn Executor>>,
}

impl HttpSender {
    pub fn builder() -> HttpSenderBuilder {
        HttpSenderBuilder::new()
    }

    pub fn request_defaults(&self) -> &RequestDefaults {
        &self.defaults
    }

    pub fn request(&self, method: Method, url: &str) -> crate::Result<Request> {
        let mut request = Request::with_defaults(method, url, &self.defaults)?
            .with_connection_provider(Arc::clone(&self.provider))
            .with_executor(Arc::clone(&self.executor));
        for entry in &self.default_headers {
            request = request.headers(entry.name(), entry.values().iter().cloned());
        }
        Ok(request)
    }

    pub fn get(&self, url: &str) -> crate::Result<Request> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> crate::Result<Request> {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> crate::Result<Request> {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> crate::Result<Request> {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> crate::Result<Request> {
        self.request(Method::DELETE, url)
    }

    pub fn options(&self, url: &str) -> crate::Result<Request> {
        self.request(Method::OPTIONS, url)
    }

    pub fn form_post(&self, url: &str) -> crate::Result<Request> {
        Ok(self.post(url)?.form(FormFields::new()))
    }

    /// Empty plan whose `try_request` entries use this sender's retry and
    /// backoff strategies.
    pub fn fallback(&self) -> FallbackPlan {
        FallbackPlan::new()
            .with_default_strategies(self.retry.clone(), self.backoff.clone())
            .with_executor(Arc::clone(&self.executor))
    }
}

impl std::fmt::Debug for HttpSender {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSender")
            .field("defaults", &self.defaults)
            .field("default_headers", &self.default_headers)
            .field("retry", &self.retry)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl HttpSenderBuilder {
    fn new() -> Self {
        Self {
            profile: ClientProfile::default(),
            advanced: AdvancedConfig::default(),
            default_headers: Headers::new(),
            user_agent: None,
            provider: None,
            executor: None,
        }
    }

    pub fn profile(mut self, profile: ClientProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn advanced_config(mut self, advanced: AdvancedConfig) -> Self {
        self.advanced = advanced;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.advanced = self.advanced.with_connect_timeout(connect_timeout);
        self
    }

    pub fn follow_redirects(mut self, follow_redirects: bool) -> Self {
        self.advanced = self.advanced.with_follow_redirects(follow_redirects);
        self
    }

    pub fn retry(mut self, retry: RetryStrategy) -> Self {
        self.advanced = self.advanced.with_retry(retry);
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.advanced = self.advanced.with_backoff(backoff);
        self
    }

    pub fn default_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.default_headers.append(name, [value]);
        self
    }

    /// User agent for the built-in ureq provider. Ignored when a custom
    /// provider is supplied.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn connection_provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> HttpSender {
        let (defaults, retry, backoff) = self.advanced.apply(self.profile.defaults());
        let provider = match (self.provider, self.user_agent) {
            (Some(provider), _) => provider,
            (None, Some(user_agent)) => {
                Arc::new(UreqConnectionProvider::new().with_user_agent(user_agent))
            }
            (None, None) => default_connection_provider(),
        };
        HttpSender {
            defaults,
            default_headers: self.default_headers,
            retry,
            backoff,
            provider,
            executor: self.executor.unwrap_or_else(default_executor),
        }
    }
}

impl Default for HttpSenderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
