//! The connection seam between request execution and the network.
//!
//! A [`ConnectionProvider`] opens one [`Connection`] per execution attempt.
//! The request pipeline configures it, writes the body, then reads status,
//! headers and one of the two response streams. [`UreqConnectionProvider`]
//! is the production implementation.

use std::io::Write;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Method;
use tracing::debug;
use url::Url;

use crate::body::BodyReader;
use crate::error::{TransportErrorKind, classify_io_error};
use crate::tls::ClientCerts;
use crate::util::redact_url_for_logs;

const REDIRECT_LIMIT: u32 = 10;
const ERROR_STATUS_FLOOR: u16 = 400;

#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Proxy for a single request. Credentials travel with the request and are
/// handed to the provider on every `open`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// `http://[user:pass@]host:port`, userinfo percent-encoded.
    pub fn proxy_uri(&self) -> String {
        match &self.credentials {
            Some(credentials) => format!(
                "http://{}:{}@{}:{}",
                encode_userinfo(&credentials.username),
                encode_userinfo(&credentials.password),
                self.host,
                self.port
            ),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }
}

fn encode_userinfo(text: &str) -> String {
    url::form_urlencoded::byte_serialize(text.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Operations available only on https connections.
pub trait SecureConnection {
    /// Accept any certificate and host name.
    fn trust_all_hosts(&mut self);

    fn install_client_certs(&mut self, certs: &ClientCerts) -> crate::Result<()>;
}

/// One configurable HTTP exchange.
///
/// Setters are called before the first response accessor. The first call to
/// [`Connection::response_code`], [`Connection::response_message`],
/// [`Connection::header_fields`] or either stream accessor sends the request.
pub trait Connection: Send {
    fn url(&self) -> &Url;

    fn set_method(&mut self, method: &Method) -> std::io::Result<()>;

    fn set_header(&mut self, name: &str, value: &str);

    fn set_follow_redirects(&mut self, follow: bool);

    fn set_connect_timeout(&mut self, timeout: Duration);

    fn set_output_enabled(&mut self, enabled: bool);

    fn output_stream(&mut self) -> std::io::Result<&mut dyn Write>;

    fn response_code(&mut self) -> std::io::Result<u16>;

    fn response_message(&mut self) -> std::io::Result<Option<String>>;

    fn header_fields(&mut self) -> std::io::Result<Vec<(String, String)>>;

    /// Body of a successful response; taken at most once.
    fn input_stream(&mut self) -> std::io::Result<Option<BodyReader>>;

    /// Body of an error response; taken at most once.
    fn error_stream(&mut self) -> Option<BodyReader>;

    fn secure(&mut self) -> Option<&mut dyn SecureConnection>;

    fn disconnect(&mut self);
}

pub trait ConnectionProvider: Send + Sync {
    fn open(&self, url: &Url, proxy: Option<&ProxyConfig>) -> std::io::Result<Box<dyn Connection>>;
}

pub fn default_connection_provider() -> Arc<dyn ConnectionProvider> {
    static PROVIDER: OnceLock<Arc<dyn ConnectionProvider>> = OnceLock::new();
    Arc::clone(PROVIDER.get_or_init(|| Arc::new(UreqConnectionProvider::new())))
}

/// Classifies a connection failure, looking through `io::Error` wrappers for
/// the transport's own error first.
pub(crate) fn classify_connection_error(error: &std::io::Error) -> TransportErrorKind {
    match wrapped_ureq_error(error) {
        Some(source) => classify_ureq_transport_error(source),
        None => classify_io_error(error),
    }
}

fn wrapped_ureq_error(io_error: &std::io::Error) -> Option<&ureq::Error> {
    io_error
        .get_ref()
        .and_then(|source| source.downcast_ref::<ureq::Error>())
}

fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-rustls")]
        ureq::Error::Rustls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-native")]
        ureq::Error::NativeTls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-native")]
        ureq::Error::Der(_) => TransportErrorKind::Tls,
        #[cfg(any(feature = "tls-rustls", feature = "tls-native"))]
        ureq::Error::Pem(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => classify_io_error(source),
        _ => TransportErrorKind::Other,
    }
}

fn ureq_io_error(error: ureq::Error) -> std::io::Error {
    match error {
        ureq::Error::Io(source) => source,
        other => std::io::Error::other(other),
    }
}

/// Opens connections backed by a fresh `ureq` agent per exchange, so
/// redirect, timeout, proxy and TLS settings never leak between requests.
#[derive(Clone, Debug, Default)]
pub struct UreqConnectionProvider {
    user_agent: Option<String>,
}

impl UreqConnectionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

impl ConnectionProvider for UreqConnectionProvider {
    fn open(&self, url: &Url, proxy: Option<&ProxyConfig>) -> std::io::Result<Box<dyn Connection>> {
        let proxy = proxy
            .map(|proxy| ureq::Proxy::new(&proxy.proxy_uri()).map_err(ureq_io_error))
            .transpose()?;
        Ok(Box::new(UreqConnection {
            url: url.clone(),
            method: Method::GET,
            headers: Vec::new(),
            follow_redirects: true,
            connect_timeout: None,
            output_enabled: false,
            output: Vec::new(),
            proxy,
            user_agent: self.user_agent.clone(),
            state: ExchangeState::Pending,
            tls: UreqTls::default(),
        }))
    }
}

#[derive(Default)]
struct UreqTls {
    trust_all: bool,
    client_cert: Option<ureq::tls::ClientCert>,
}

impl SecureConnection for UreqTls {
    fn trust_all_hosts(&mut self) {
        self.trust_all = true;
    }

    fn install_client_certs(&mut self, certs: &ClientCerts) -> crate::Result<()> {
        self.client_cert = Some(certs.to_ureq_client_cert()?);
        Ok(())
    }
}

struct ReceivedResponse {
    status: http::StatusCode,
    headers: Vec<(String, String)>,
    body: Option<BodyReader>,
}

enum ExchangeState {
    Pending,
    Received(ReceivedResponse),
    Disconnected,
}

struct UreqConnection {
    url: Url,
    method: Method,
    headers: Vec<(String, String)>,
    follow_redirects: bool,
    connect_timeout: Option<Duration>,
    output_enabled: bool,
    output: Vec<u8>,
    proxy: Option<ureq::Proxy>,
    user_agent: Option<String>,
    state: ExchangeState,
    tls: UreqTls,
}

impl UreqConnection {
    fn make_agent(&self) -> ureq::Agent {
        let tls_config = ureq::tls::TlsConfig::builder()
            .disable_verification(self.tls.trust_all)
            .client_cert(self.tls.client_cert.clone())
            .build();
        let mut config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(if self.follow_redirects {
                REDIRECT_LIMIT
            } else {
                0
            })
            .max_redirects_will_error(false)
            .timeout_connect(self.connect_timeout)
            .tls_config(tls_config)
            .proxy(self.proxy.clone());
        if let Some(user_agent) = &self.user_agent {
            config = config.user_agent(user_agent.as_str());
        }
        config.build().new_agent()
    }

    fn ensure_sent(&mut self) -> std::io::Result<&mut ReceivedResponse> {
        if let ExchangeState::Pending = self.state {
            let received = self.send()?;
            self.state = ExchangeState::Received(received);
        }
        match &mut self.state {
            ExchangeState::Received(received) => Ok(received),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection was disconnected",
            )),
        }
    }

    fn send(&mut self) -> std::io::Result<ReceivedResponse> {
        let agent = self.make_agent();
        debug!(
            method = %self.method,
            url = %redact_url_for_logs(self.url.as_str()),
            "opening ureq exchange"
        );
        let mut builder = ureq::http::Request::builder()
            .method(self.method.clone())
            .uri(self.url.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let result = if self.output_enabled {
            let request = builder
                .body(std::mem::take(&mut self.output))
                .map_err(std::io::Error::other)?;
            agent.run(request)
        } else {
            let request = builder.body(()).map_err(std::io::Error::other)?;
            agent.run(request)
        };
        let response = result.map_err(ureq_io_error)?;

        let (parts, body) = response.into_parts();
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Ok(ReceivedResponse {
            status: parts.status,
            headers,
            body: Some(Box::new(body.into_reader())),
        })
    }
}

impl Connection for UreqConnection {
    fn url(&self) -> &Url {
        &self.url
    }

    fn set_method(&mut self, method: &Method) -> std::io::Result<()> {
        self.method = method.clone();
        Ok(())
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value.to_owned()));
    }

    fn set_follow_redirects(&mut self, follow: bool) {
        self.follow_redirects = follow;
    }

    fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = (!timeout.is_zero()).then_some(timeout);
    }

    fn set_output_enabled(&mut self, enabled: bool) {
        self.output_enabled = enabled;
    }

    fn output_stream(&mut self) -> std::io::Result<&mut dyn Write> {
        if !self.output_enabled {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "output is not enabled for this connection",
            ));
        }
        if !matches!(self.state, ExchangeState::Pending) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "request was already sent",
            ));
        }
        Ok(&mut self.output)
    }

    fn response_code(&mut self) -> std::io::Result<u16> {
        Ok(self.ensure_sent()?.status.as_u16())
    }

    fn response_message(&mut self) -> std::io::Result<Option<String>> {
        Ok(self
            .ensure_sent()?
            .status
            .canonical_reason()
            .map(str::to_owned))
    }

    fn header_fields(&mut self) -> std::io::Result<Vec<(String, String)>> {
        Ok(self.ensure_sent()?.headers.clone())
    }

    fn input_stream(&mut self) -> std::io::Result<Option<BodyReader>> {
        let received = self.ensure_sent()?;
        if received.status.as_u16() >= ERROR_STATUS_FLOOR {
            return Ok(None);
        }
        Ok(received.body.take())
    }

    fn error_stream(&mut self) -> Option<BodyReader> {
        match &mut self.state {
            ExchangeState::Received(received) if received.status.as_u16() >= ERROR_STATUS_FLOOR => {
                received.body.take()
            }
            _ => None,
        }
    }

    fn secure(&mut self) -> Option<&mut dyn SecureConnection> {
        if self.url.scheme() == "https" {
            Some(&mut self.tls)
        } else {
            None
        }
    }

    fn disconnect(&mut self) {
        self.state = ExchangeState::Disconnected;
    }
}
