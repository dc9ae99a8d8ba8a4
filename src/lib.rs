//! `reqtree` is a blocking-first HTTP client whose requests compose into
//! fallback trees.
//!
//! A [`Request`] is described declaratively, with `{name}` placeholders
//! resolved in the URL, query, headers and form fields right before it is
//! sent. A [`FallbackPlan`] lists alternatives, each with its own retry and
//! backoff strategy; plans nest inside plans, and both run through the same
//! [`Executable`] contract.
//!
//! # Quick Start
//!
//! ```no_run
//! use reqtree::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let primary = Request::get("https://{region}.api.example.com/v1/items/{id}")?
//!         .placeholder("region", "eu")?
//!         .placeholder("id", "42")?
//!         .header("Accept", "application/json");
//!     let backup = primary.copy().placeholder("region", "us")?;
//!
//!     let plan = FallbackPlan::new()
//!         .try_request_with(
//!             primary,
//!             true,
//!             RetryStrategy::max_total_tries(3),
//!             BackoffStrategy::specified(&[100, 250]),
//!         )
//!         .try_request(backup);
//!
//!     let mut response = plan.execute()?;
//!     println!("{} in {:?}: {}", response.status(), response.elapsed(), response.text()?);
//!     Ok(())
//! }
//! ```

#[cfg(all(not(feature = "tls-rustls"), not(feature = "tls-native")))]
compile_error!("reqtree requires one TLS backend feature: enable `tls-rustls` or `tls-native`");

mod body;
mod client;
mod config;
mod error;
mod execute;
mod executor;
mod fallback;
mod headers;
mod placeholder;
mod request;
mod response;
mod retry;
mod target;
mod tls;
mod transport;
mod util;

pub use crate::body::{
    BodyReader, BodySource, FORM_CONTENT_TYPE, FormFields, JSON_CONTENT_TYPE, RepeatableBody,
};
pub use crate::client::{HttpSender, HttpSenderBuilder};
pub use crate::config::{
    AdvancedConfig, ClientProfile, DEFAULT_CONNECT_TIMEOUT, ProfileDefaults, RequestDefaults,
};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::execute::Executable;
pub use crate::executor::{
    Executor, Job, ResponseFuture, ThreadExecutor, TokioExecutor, default_executor,
};
pub use crate::fallback::{FallbackEntry, FallbackPlan, FallbackSession};
pub use crate::headers::{HeaderValues, Headers};
pub use crate::placeholder::Placeholders;
pub use crate::request::Request;
pub use crate::response::{Response, ResponseBody};
pub use crate::retry::{BackoffStrategy, RetryStrategy};
pub use crate::target::{QueryParams, UrlTemplate};
pub use crate::tls::ClientCerts;
pub use crate::transport::{
    Connection, ConnectionProvider, ProxyConfig, ProxyCredentials, SecureConnection,
    UreqConnectionProvider, default_connection_provider,
};

pub use http::Method;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BackoffStrategy, ClientProfile, Error, ErrorCode, Executable, FallbackEntry, FallbackPlan,
        HttpSender, Method, Request, Response, RetryStrategy,
    };
}
