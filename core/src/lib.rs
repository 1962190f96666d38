//! Synchronous client core for the Hodela API.
//!
//! # Overview
//! Turns a logical [`Call`] (method, endpoint, parameters, files) into one
//! HTTP exchange, or packs several calls into one [`BatchPlan`] round trip,
//! and decodes the reply into a [`Response`] or a typed [`Error`].
//!
//! # Design
//! - [`Call`] signs itself with [`Credentials`] and chooses urlencoded or
//!   multipart encoding; credential parameters from callers are discarded.
//! - [`BatchPlan`] is a separate type compiled into one outer `Call`.
//! - [`Client`] owns the [`HttpTransport`] it was built with and a request
//!   counter; it picks the timeout tier and raises API error payloads.
//! - Transports are injected. [`UreqTransport`] ships by default and a
//!   reqwest-based one sits behind the `reqwest` feature.
//! - The crate logs through `tracing` and never installs a subscriber.

pub mod batch;
pub mod body;
pub mod call;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod file;
pub mod http;
pub mod response;
pub mod sdk;
pub mod transport;
pub mod urls;

pub use batch::{BatchEntry, BatchPlan, CompiledBatch, BATCH_REQUEST_LIMIT};
pub use call::{Call, Param, Params};
pub use client::Client;
pub use config::ClientConfig;
pub use credentials::{AppId, Credentials};
pub use error::{ApiError, ApiErrorKind, Error, Result, TransportError};
pub use file::{FileKind, UploadableFile};
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
pub use response::{BatchResponse, Response};
pub use sdk::Hodela;
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
pub use transport::{transport_for, TransportKind, UreqTransport};
