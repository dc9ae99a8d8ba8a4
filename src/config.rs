use std::time::Duration;

use crate::retry::{BackoffStrategy, RetryStrategy};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientProfile {
    #[default]
    Standard,
    LowLatency,
    Patient,
}

#[derive(Clone, Debug)]
pub struct ProfileDefaults {
    pub connect_timeout: Duration,
    pub follow_redirects: bool,
    pub retry: RetryStrategy,
    pub backoff: BackoffStrategy,
}

impl ClientProfile {
    pub fn defaults(self) -> ProfileDefaults {
        match self {
            Self::Standard => ProfileDefaults {
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                follow_redirects: true,
                retry: RetryStrategy::max_total_tries(1),
                backoff: BackoffStrategy::none(),
            },
            Self::LowLatency => ProfileDefaults {
                connect_timeout: Duration::from_secs(2),
                follow_redirects: true,
                retry: RetryStrategy::max_total_tries(2),
                backoff: BackoffStrategy::specified(&[50]),
            },
            Self::Patient => ProfileDefaults {
                connect_timeout: Duration::from_secs(60),
                follow_redirects: true,
                retry: RetryStrategy::max_total_tries(4),
                backoff: BackoffStrategy::exponential(
                    Duration::from_millis(200),
                    Duration::from_secs(5),
                )
                .with_jitter(0.2),
            },
        }
    }
}

/// Connection settings stamped onto each new request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDefaults {
    pub connect_timeout: Duration,
    pub follow_redirects: bool,
    pub trust_all: bool,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            follow_redirects: true,
            trust_all: false,
        }
    }
}

impl RequestDefaults {
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_follow_redirects(mut self, follow_redirects: bool) -> Self {
        self.follow_redirects = follow_redirects;
        self
    }

    pub fn with_trust_all(mut self, trust_all: bool) -> Self {
        self.trust_all = trust_all;
        self
    }
}

impl From<&ProfileDefaults> for RequestDefaults {
    fn from(profile: &ProfileDefaults) -> Self {
        Self {
            connect_timeout: profile.connect_timeout,
            follow_redirects: profile.follow_redirects,
            trust_all: false,
        }
    }
}

/// Piecemeal overrides applied on top of a profile.
#[derive(Clone, Debug, Default)]
pub struct AdvancedConfig {
    pub connect_timeout: Option<Duration>,
    pub follow_redirects: Option<bool>,
    pub trust_all: Option<bool>,
    pub retry: Option<RetryStrategy>,
    pub backoff: Option<BackoffStrategy>,
}

impl AdvancedConfig {
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }

    pub fn with_follow_redirects(mut self, follow_redirects: bool) -> Self {
        self.follow_redirects = Some(follow_redirects);
        self
    }

    pub fn with_trust_all(mut self, trust_all: bool) -> Self {
        self.trust_all = Some(trust_all);
        self
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub(crate) fn apply(&self, profile: ProfileDefaults) -> (RequestDefaults, RetryStrategy, BackoffStrategy) {
        let mut request = RequestDefaults::from(&profile);
        if let Some(connect_timeout) = self.connect_timeout {
            request.connect_timeout = connect_timeout;
        }
        if let Some(follow_redirects) = self.follow_redirects {
            request.follow_redirects = follow_redirects;
        }
        if let Some(trust_all) = self.trust_all {
            request.trust_all = trust_all;
        }
        let retry = self.retry.clone().unwrap_or(profile.retry);
        let backoff = self.backoff.clone().unwrap_or(profile.backoff);
        (request, retry, backoff)
    }
}
