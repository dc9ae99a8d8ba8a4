//! Outbound request payloads.

use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use url::form_urlencoded;

use crate::placeholder::Placeholders;
use crate::util::{lock_unpoisoned, read_fully};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const JSON_CONTENT_TYPE: &str = "application/json";

pub type BodyReader = Box<dyn Read + Send>;

/// Something that can hand out a fresh byte stream every time a request is
/// sent.
pub trait BodySource: Send + Sync {
    fn open(&self) -> std::io::Result<BodyReader>;
}

enum BodyState {
    Buffered(Bytes),
    Pending(BodyReader),
    Failed(String),
}

/// A body that can be re-sent on retry.
///
/// Streaming sources are read to the end the first time the body is opened;
/// every later open replays the buffered bytes. Clones share the buffer.
#[derive(Clone)]
pub struct RepeatableBody {
    state: Arc<Mutex<BodyState>>,
}

impl RepeatableBody {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::with_state(BodyState::Buffered(bytes.into()))
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_bytes(Bytes::from(text.into()))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::with_state(BodyState::Pending(Box::new(reader)))
    }

    fn with_state(state: BodyState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// The buffered payload, reading the underlying stream if that has not
    /// happened yet.
    pub fn bytes(&self) -> std::io::Result<Bytes> {
        let mut state = lock_unpoisoned(&self.state);
        if let BodyState::Pending(_) = &*state {
            let pending = std::mem::replace(&mut *state, BodyState::Buffered(Bytes::new()));
            if let BodyState::Pending(mut reader) = pending {
                *state = match read_fully(reader.as_mut()) {
                    Ok(buffered) => BodyState::Buffered(Bytes::from(buffered)),
                    Err(error) => BodyState::Failed(error.to_string()),
                };
            }
        }
        match &*state {
            BodyState::Buffered(bytes) => Ok(bytes.clone()),
            BodyState::Failed(message) => Err(std::io::Error::other(format!(
                "request body source failed while buffering: {message}"
            ))),
            BodyState::Pending(_) => Err(std::io::Error::other("request body was not buffered")),
        }
    }

    pub fn is_buffered(&self) -> bool {
        matches!(&*lock_unpoisoned(&self.state), BodyState::Buffered(_))
    }
}

impl BodySource for RepeatableBody {
    fn open(&self) -> std::io::Result<BodyReader> {
        Ok(Box::new(Cursor::new(self.bytes()?)))
    }
}

impl std::fmt::Debug for RepeatableBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*lock_unpoisoned(&self.state) {
            BodyState::Buffered(bytes) => format!("buffered({} bytes)", bytes.len()),
            BodyState::Pending(_) => "pending".to_owned(),
            BodyState::Failed(_) => "failed".to_owned(),
        };
        formatter
            .debug_struct("RepeatableBody")
            .field("state", &state)
            .finish()
    }
}

/// Form fields in insertion order, encoded at send time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormFields {
    fields: Vec<(String, String)>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Substitutes placeholders in names and values, then url-encodes them.
    pub fn encode(&self, placeholders: &Placeholders) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.fields {
            serializer.append_pair(&placeholders.apply(name), &placeholders.apply(value));
        }
        serializer.finish()
    }
}

#[derive(Clone, Default)]
pub(crate) enum Payload {
    #[default]
    None,
    Source(Arc<dyn BodySource>),
    Form(FormFields),
}

impl Payload {
    pub(crate) fn is_present(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub(crate) fn is_form(&self) -> bool {
        matches!(self, Self::Form(_))
    }

    /// Appends a form field, replacing any non-form payload.
    pub(crate) fn push_form_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let mut fields = match std::mem::take(self) {
            Self::Form(fields) => fields,
            _ => FormFields::new(),
        };
        fields.push(name, value);
        *self = Self::Form(fields);
    }

    pub(crate) fn open(&self, placeholders: &Placeholders) -> std::io::Result<Option<BodyReader>> {
        match self {
            Self::None => Ok(None),
            Self::Source(source) => source.open().map(Some),
            Self::Form(fields) => {
                let encoded = fields.encode(placeholders);
                Ok(Some(Box::new(Cursor::new(encoded.into_bytes()))))
            }
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => formatter.write_str("None"),
            Self::Source(_) => formatter.write_str("Source(..)"),
            Self::Form(fields) => formatter.debug_tuple("Form").field(fields).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{BodySource, FormFields, Payload, RepeatableBody};
    use crate::placeholder::Placeholders;

    struct CountingReader {
        inner: std::io::Cursor<Vec<u8>>,
        reads: Arc<AtomicUsize>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(buffer)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buffer: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk gone"))
        }
    }

    fn drain(source: &dyn BodySource) -> Vec<u8> {
        let mut collected = Vec::new();
        source
            .open()
            .expect("body should open")
            .read_to_end(&mut collected)
            .expect("body should read");
        collected
    }

    #[test]
    fn reader_body_is_buffered_once_and_replayed() {
        let reads = Arc::new(AtomicUsize::new(0));
        let body = RepeatableBody::from_reader(CountingReader {
            inner: std::io::Cursor::new(b"payload".to_vec()),
            reads: Arc::clone(&reads),
        });
        assert!(!body.is_buffered());

        assert_eq!(drain(&body), b"payload");
        let reads_after_first = reads.load(Ordering::SeqCst);
        assert_eq!(drain(&body.clone()), b"payload");
        assert_eq!(reads.load(Ordering::SeqCst), reads_after_first);
        assert!(body.is_buffered());
    }

    #[test]
    fn failing_reader_keeps_failing() {
        let body = RepeatableBody::from_reader(FailingReader);
        assert!(body.open().is_err());
        assert!(body.open().is_err());
    }

    #[test]
    fn form_fields_are_substituted_then_encoded() {
        let mut placeholders = Placeholders::new();
        placeholders
            .insert("user", "jane doe")
            .expect("placeholder should be accepted");
        let mut fields = FormFields::new();
        fields.push("name", "{user}");
        fields.push("note", "a&b=c");
        fields.push("{user}", "x");
        assert_eq!(
            fields.encode(&placeholders),
            "name=jane+doe&note=a%26b%3Dc&jane+doe=x"
        );
    }

    #[test]
    fn payload_switches_to_form_on_first_field() {
        let mut payload = Payload::None;
        assert!(!payload.is_present());
        payload.push_form_field("a", "1");
        payload.push_form_field("b", "2");
        assert!(payload.is_form());

        let mut reader = payload
            .open(&Placeholders::new())
            .expect("form should open")
            .expect("form should produce a body");
        let mut text = String::new();
        reader.read_to_string(&mut text).expect("form should read");
        assert_eq!(text, "a=1&b=2");
    }
}
