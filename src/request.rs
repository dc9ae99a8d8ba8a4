use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use http::Method;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::body::{
    BodySource, FORM_CONTENT_TYPE, FormFields, JSON_CONTENT_TYPE, Payload, RepeatableBody,
};
use crate::config::RequestDefaults;
use crate::error::Error;
use crate::execute::Executable;
use crate::executor::{Executor, default_executor};
use crate::fallback::FallbackSession;
use crate::headers::Headers;
use crate::placeholder::Placeholders;
use crate::response::{Response, ResponseBody};
use crate::target::{QueryParams, UrlTemplate, assemble_url};
use crate::tls::ClientCerts;
use crate::transport::{
    Connection, ConnectionProvider, ProxyConfig, classify_connection_error,
    default_connection_provider,
};
use crate::util::{CopyError, copy_fully, redact_url_for_logs};

const CONTENT_TYPE: &str = "Content-Type";

/// One HTTP call, described before any placeholder is resolved.
///
/// Built fluently and executed through [`Executable`]. Every execution works
/// on a snapshot, so a request can be reused or changed after it fired.
#[derive(Clone)]
pub struct Request {
    method: Method,
    template: UrlTemplate,
    headers: Headers,
    query: QueryParams,
    placeholders: Placeholders,
    trust_all: bool,
    client_certs: Option<ClientCerts>,
    follow_redirects: bool,
    connect_timeout: Duration,
    proxy: Option<ProxyConfig>,
    payload: Payload,
    provider: Arc<dyn ConnectionProvider>,
    executor: Arc<dyn Executor>,
}

impl Request {
    pub fn new(method: Method, url: &str) -> crate::Result<Self> {
        Self::with_defaults(method, url, &RequestDefaults::default())
    }

    pub fn with_defaults(method: Method, url: &str, defaults: &RequestDefaults) -> crate::Result<Self> {
        Ok(Self {
            method,
            template: UrlTemplate::parse(url)?,
            headers: Headers::new(),
            query: QueryParams::new(),
            placeholders: Placeholders::new(),
            trust_all: defaults.trust_all,
            client_certs: None,
            follow_redirects: defaults.follow_redirects,
            connect_timeout: defaults.connect_timeout,
            proxy: None,
            payload: Payload::None,
            provider: default_connection_provider(),
            executor: default_executor(),
        })
    }

    pub fn get(url: &str) -> crate::Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str) -> crate::Result<Self> {
        Self::new(Method::POST, url)
    }

    pub fn put(url: &str) -> crate::Result<Self> {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: &str) -> crate::Result<Self> {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: &str) -> crate::Result<Self> {
        Self::new(Method::DELETE, url)
    }

    pub fn options(url: &str) -> crate::Result<Self> {
        Self::new(Method::OPTIONS, url)
    }

    pub fn form_post(url: &str) -> crate::Result<Self> {
        Ok(Self::post(url)?.form(FormFields::new()))
    }

    /// Adds a value under `name`; names differing only in case share one entry.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, [value]);
        self
    }

    pub fn headers<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.headers.append(name, values);
        self
    }

    pub fn placeholder(mut self, name: impl Into<String>, value: impl Into<String>) -> crate::Result<Self> {
        self.placeholders.insert(name, value)?;
        Ok(self)
    }

    pub fn clear_placeholders(mut self) -> Self {
        self.placeholders.clear();
        self
    }

    pub fn query_param(mut self, name: &str, value: &str) -> Self {
        self.query.append(name, [value]);
        self
    }

    pub fn query_params<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        self.query.append(name, values);
        self
    }

    pub fn clear_query_params(mut self) -> Self {
        self.query.clear();
        self
    }

    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy = Some(ProxyConfig::new(host, port));
        self
    }

    pub fn proxy_with_credentials(
        mut self,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.proxy = Some(ProxyConfig::new(host, port).with_credentials(username, password));
        self
    }

    pub fn proxy_config(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn trust_all(mut self, trust_all: bool) -> Self {
        self.trust_all = trust_all;
        self
    }

    pub fn follow_redirects(mut self, follow_redirects: bool) -> Self {
        self.follow_redirects = follow_redirects;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn client_certs(mut self, client_certs: ClientCerts) -> Self {
        self.client_certs = Some(client_certs);
        self
    }

    pub fn body(mut self, body: RepeatableBody) -> Self {
        self.payload = Payload::Source(Arc::new(body));
        self
    }

    pub fn body_bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.body(RepeatableBody::from_bytes(bytes))
    }

    pub fn body_text(self, text: impl Into<String>) -> Self {
        self.body(RepeatableBody::from_text(text))
    }

    /// Buffers `reader` on first send so retries replay the same bytes.
    pub fn body_reader<R>(self, reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        self.body(RepeatableBody::from_reader(reader))
    }

    pub fn body_source(mut self, source: Arc<dyn BodySource>) -> Self {
        self.payload = Payload::Source(source);
        self
    }

    pub fn json<T>(self, value: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_vec(value).map_err(|source| Error::SerializeJson { source })?;
        Ok(self
            .body_bytes(encoded)
            .replace_header(CONTENT_TYPE, JSON_CONTENT_TYPE))
    }

    pub fn form(mut self, fields: FormFields) -> Self {
        self.payload = Payload::Form(fields);
        self
    }

    /// Adds a url-encoded form field; switches the payload to a form.
    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.push_form_field(name, value);
        self
    }

    pub fn content_type(self, mime: &str) -> Self {
        self.replace_header(CONTENT_TYPE, mime)
    }

    pub fn content_type_with_charset(self, mime: &str, charset: &str) -> Self {
        self.replace_header(CONTENT_TYPE, format!("{mime}; charset={charset}"))
    }

    pub fn with_connection_provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    fn replace_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, [value]);
        self
    }

    /// Independent copy; later changes to either side do not affect the other.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url_template(&self) -> &UrlTemplate {
        &self.template
    }

    pub fn header_map(&self) -> &Headers {
        &self.headers
    }

    pub fn query_map(&self) -> &QueryParams {
        &self.query
    }

    pub fn placeholder_map(&self) -> &Placeholders {
        &self.placeholders
    }

    pub fn trust_all_value(&self) -> bool {
        self.trust_all
    }

    pub fn follow_redirects_value(&self) -> bool {
        self.follow_redirects
    }

    pub fn connect_timeout_value(&self) -> Duration {
        self.connect_timeout
    }

    pub fn proxy_value(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    pub fn client_certs_value(&self) -> Option<&ClientCerts> {
        self.client_certs.as_ref()
    }

    pub fn assemble_url(&self) -> crate::Result<Url> {
        assemble_url(&self.template, &self.query, &self.placeholders)
    }

    /// POST, PUT and PATCH always open an output stream; other methods do
    /// when a payload is configured.
    pub fn is_write_capable(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH) || self.payload.is_present()
    }

    fn send(&self) -> crate::Result<Response> {
        let mut snapshot = self.copy();
        if snapshot.payload.is_form() {
            snapshot.headers.set(CONTENT_TYPE, [FORM_CONTENT_TYPE]);
        }

        let url = snapshot.assemble_url()?;
        let redacted = redact_url_for_logs(url.as_str());
        debug!(method = %snapshot.method, url = %redacted, "sending request");

        let mut connection = snapshot
            .provider
            .open(&url, snapshot.proxy.as_ref())
            .map_err(|source| transport_error(&snapshot.method, &redacted, source))?;
        let started = (Instant::now(), SystemTime::now());

        match snapshot.drive(connection.as_mut(), &redacted) {
            Ok(exchange) => {
                debug!(
                    status = exchange.status,
                    elapsed_ms = started.0.elapsed().as_millis() as u64,
                    "received response headers"
                );
                Ok(Response::new(
                    exchange.status,
                    exchange.message,
                    exchange.headers,
                    ResponseBody::new(exchange.stream),
                    self.copy(),
                    started,
                    connection,
                ))
            }
            Err(error) => {
                connection.disconnect();
                Err(error)
            }
        }
    }

    fn drive(&self, connection: &mut dyn Connection, redacted: &str) -> crate::Result<Exchange> {
        let wrap = |source: std::io::Error| transport_error(&self.method, redacted, source);

        connection.set_method(&self.method).map_err(wrap)?;
        for entry in &self.headers {
            let name = self.placeholders.apply(entry.name());
            let value = self.placeholders.apply(&entry.joined());
            connection.set_header(&name, &value);
        }
        connection.set_follow_redirects(self.follow_redirects);
        connection.set_connect_timeout(self.connect_timeout);

        if connection.url().scheme() == "https"
            && let Some(secure) = connection.secure()
        {
            if self.trust_all {
                secure.trust_all_hosts();
            }
            if let Some(certs) = &self.client_certs
                && let Err(error) = secure.install_client_certs(certs)
            {
                warn!(error = %error, url = %redacted, "client certificate not installed; continuing without it");
            }
        }

        if self.is_write_capable() {
            connection.set_output_enabled(true);
            let body = self
                .payload
                .open(&self.placeholders)
                .map_err(|source| Error::RequestBody { source })?;
            if let Some(mut body) = body {
                let output = connection.output_stream().map_err(wrap)?;
                copy_fully(body.as_mut(), output).map_err(|error| match error {
                    CopyError::Read(source) => Error::RequestBody { source },
                    CopyError::Write(source) => wrap(source),
                })?;
            }
        }

        let status = connection.response_code().map_err(wrap)?;
        let message = connection.response_message().map_err(wrap)?;
        let headers: Headers = connection.header_fields().map_err(wrap)?.into_iter().collect();
        let stream = match connection.error_stream() {
            Some(stream) => Some(stream),
            None => connection.input_stream().map_err(wrap)?,
        };

        Ok(Exchange {
            status,
            message,
            headers,
            stream,
        })
    }
}

struct Exchange {
    status: u16,
    message: Option<String>,
    headers: Headers,
    stream: Option<crate::body::BodyReader>,
}

fn transport_error(method: &Method, redacted_url: &str, source: std::io::Error) -> Error {
    Error::Transport {
        kind: classify_connection_error(&source),
        method: method.clone(),
        url: redacted_url.to_owned(),
        source: Box::new(source),
    }
}

impl Executable for Request {
    fn execute_within(&self, _session: &mut FallbackSession) -> crate::Result<Response> {
        self.send()
    }

    fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.template.as_str())
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("placeholders", &self.placeholders)
            .field("trust_all", &self.trust_all)
            .field("follow_redirects", &self.follow_redirects)
            .field("connect_timeout", &self.connect_timeout)
            .field("proxy", &self.proxy)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}
