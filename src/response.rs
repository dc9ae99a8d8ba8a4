use std::io::Read;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::body::BodyReader;
use crate::error::Error;
use crate::headers::Headers;
use crate::request::Request;
use crate::transport::Connection;
use crate::util::{read_fully, truncate_body};

const ERROR_STATUS_FLOOR: u16 = 400;

/// Response body stream that records when it was closed.
///
/// The finish time is set exactly once: by [`ResponseBody::close`], by
/// draining helpers on [`Response`], or at construction when the exchange
/// produced no stream at all.
pub struct ResponseBody {
    reader: Option<BodyReader>,
    finished: Option<(Instant, SystemTime)>,
}

impl ResponseBody {
    pub(crate) fn new(reader: Option<BodyReader>) -> Self {
        let finished = match reader {
            Some(_) => None,
            None => Some((Instant::now(), SystemTime::now())),
        };
        Self { reader, finished }
    }

    /// Drops the underlying stream and records the finish time. Repeated
    /// calls keep the first timestamp.
    pub fn close(&mut self) {
        self.reader = None;
        if self.finished.is_none() {
            self.finished = Some((Instant::now(), SystemTime::now()));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.finished.is_some()
    }

    fn finished_instant(&self) -> Option<Instant> {
        self.finished.map(|(instant, _)| instant)
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buffer),
            None => Ok(0),
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResponseBody")
            .field("open", &self.reader.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Outcome of one executed request.
///
/// The connection stays open until [`Response::release`] runs, either
/// explicitly, through one of the draining accessors, or on drop.
pub struct Response {
    status: u16,
    message: Option<String>,
    headers: Headers,
    body: ResponseBody,
    request: Request,
    started: Instant,
    started_at: SystemTime,
    connection: Option<Box<dyn Connection>>,
}

impl Response {
    pub(crate) fn new(
        status: u16,
        message: Option<String>,
        headers: Headers,
        body: ResponseBody,
        request: Request,
        started: (Instant, SystemTime),
        connection: Box<dyn Connection>,
    ) -> Self {
        Self {
            status,
            message,
            headers,
            body,
            request,
            started: started.0,
            started_at: started.1,
            connection: Some(connection),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_error(&self) -> bool {
        self.status >= ERROR_STATUS_FLOOR
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.first(name)
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<SystemTime> {
        self.body.finished.map(|(_, wall)| wall)
    }

    pub fn is_complete(&self) -> bool {
        self.body.is_closed()
    }

    /// Time from connection open to body close, or to now while the body is
    /// still open.
    pub fn elapsed(&self) -> Duration {
        match self.body.finished_instant() {
            Some(finished) => finished.saturating_duration_since(self.started),
            None => self.started.elapsed(),
        }
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub fn charset(&self) -> Option<String> {
        let content_type = self.header("content-type")?;
        let mime = content_type.parse::<mime::Mime>().ok()?;
        mime.get_param(mime::CHARSET)
            .map(|charset| charset.as_str().to_owned())
    }

    /// Reads the whole body and releases the connection.
    pub fn bytes(&mut self) -> crate::Result<Bytes> {
        let collected = read_fully(&mut self.body);
        self.release();
        collected
            .map(Bytes::from)
            .map_err(|source| Error::ReadBody { source })
    }

    /// Decodes the body with the charset from `Content-Type`, falling back
    /// to UTF-8 when none is declared or the label is unknown.
    pub fn text(&mut self) -> crate::Result<String> {
        let charset = self.charset();
        self.text_with_charset(charset.as_deref().unwrap_or("utf-8"))
    }

    pub fn text_with_charset(&mut self, label: &str) -> crate::Result<String> {
        let bytes = self.bytes()?;
        let encoding =
            encoding_rs::Encoding::for_label(label.trim().as_bytes()).unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = encoding.decode(&bytes);
        Ok(text.into_owned())
    }

    pub fn json<T>(&mut self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        let bytes = self.bytes()?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&bytes),
        })
    }

    /// Drains whatever is left of the body, then releases the connection.
    pub fn discard(&mut self) {
        if let Err(error) = std::io::copy(&mut self.body, &mut std::io::sink()) {
            debug!(status = self.status, error = %error, "failed to drain discarded response body");
        }
        self.release();
    }

    /// Closes the body and disconnects. Safe to call more than once.
    pub fn release(&mut self) {
        self.body.close();
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect();
        }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Response")
            .field("status", &self.status)
            .field("message", &self.message)
            .field("headers", &self.headers)
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}
