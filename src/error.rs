use http::Method;
use thiserror::Error as ThisError;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Timeout,
    Write,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Write => "write",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    InvalidPlaceholder,
    SerializeJson,
    Transport,
    RequestBody,
    ReadBody,
    Deserialize,
    TlsConfig,
    FallbackExhausted,
    Canceled,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::InvalidPlaceholder => "invalid_placeholder",
            Self::SerializeJson => "serialize_json",
            Self::Transport => "transport",
            Self::RequestBody => "request_body",
            Self::ReadBody => "read_body",
            Self::Deserialize => "deserialize",
            Self::TlsConfig => "tls_config",
            Self::FallbackExhausted => "fallback_exhausted",
            Self::Canceled => "canceled",
        }
    }
}

#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("placeholder {name:?} must not contain curly braces")]
    InvalidPlaceholder { name: String },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("http transport error ({kind}) for {method} {url}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to produce request body: {source}")]
    RequestBody {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid client certificate configuration: {message}")]
    TlsConfig { message: String },
    #[error("fallback plan exhausted after {attempts} attempt(s){}", last_status_suffix(.last_status))]
    FallbackExhausted {
        attempts: usize,
        last_status: Option<u16>,
        #[source]
        source: Option<Box<Error>>,
    },
    #[error("asynchronous execution was canceled before producing a result")]
    Canceled,
}

fn last_status_suffix(last_status: &Option<u16>) -> String {
    match last_status {
        Some(status) => format!("; last status {status}"),
        None => String::new(),
    }
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidPlaceholder { .. } => ErrorCode::InvalidPlaceholder,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::RequestBody { .. } => ErrorCode::RequestBody,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::FallbackExhausted { .. } => ErrorCode::FallbackExhausted,
            Self::Canceled => ErrorCode::Canceled,
        }
    }

    /// Kind of transport failure, looking through fallback exhaustion to the
    /// last recorded cause.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            Self::FallbackExhausted {
                source: Some(source),
                ..
            } => source.transport_kind(),
            _ => None,
        }
    }
}

pub(crate) fn invalid_url(url: &str, reason: impl Into<String>) -> Error {
    Error::InvalidUrl {
        url: url.to_owned(),
        reason: reason.into(),
    }
}

pub(crate) fn classify_io_error(error: &std::io::Error) -> TransportErrorKind {
    match error.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            TransportErrorKind::Timeout
        }
        std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::WriteZero => {
            TransportErrorKind::Write
        }
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::UnexpectedEof => {
            TransportErrorKind::Read
        }
        _ => TransportErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode, TransportErrorKind};

    #[test]
    fn exhaustion_message_mentions_last_status_only_when_present() {
        let with_status = Error::FallbackExhausted {
            attempts: 3,
            last_status: Some(503),
            source: None,
        };
        assert_eq!(
            with_status.to_string(),
            "fallback plan exhausted after 3 attempt(s); last status 503"
        );

        let without_status = Error::FallbackExhausted {
            attempts: 1,
            last_status: None,
            source: None,
        };
        assert_eq!(
            without_status.to_string(),
            "fallback plan exhausted after 1 attempt(s)"
        );
        assert_eq!(without_status.code(), ErrorCode::FallbackExhausted);
    }

    #[test]
    fn transport_kind_looks_through_exhaustion() {
        let transport = Error::Transport {
            kind: TransportErrorKind::Connect,
            method: http::Method::GET,
            url: "http://a.test/".to_owned(),
            source: "refused".into(),
        };
        let exhausted = Error::FallbackExhausted {
            attempts: 2,
            last_status: None,
            source: Some(Box::new(transport)),
        };
        assert_eq!(
            exhausted.transport_kind(),
            Some(TransportErrorKind::Connect)
        );
        assert_eq!(exhausted.code().as_str(), "fallback_exhausted");
    }
}
