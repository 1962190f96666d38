//! Concrete `HttpTransport` implementations.
//!
//! [`UreqTransport`] is always available. [`ReqwestTransport`] uses reqwest's
//! blocking client and is compiled in with the `reqwest` feature. Which one a
//! client uses is decided by configuration through [`transport_for`].

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, TransportError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Names a transport implementation in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ureq,
    Reqwest,
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ureq" => Ok(TransportKind::Ureq),
            "reqwest" => Ok(TransportKind::Reqwest),
            other => Err(Error::Configuration(format!(
                "unknown HTTP client {other:?}, expected \"ureq\" or \"reqwest\""
            ))),
        }
    }
}

/// Build the transport named by `kind`.
pub fn transport_for(kind: TransportKind) -> Result<Box<dyn HttpTransport>> {
    match kind {
        TransportKind::Ureq => Ok(Box::new(UreqTransport::new())),
        #[cfg(feature = "reqwest")]
        TransportKind::Reqwest => Ok(Box::new(ReqwestTransport::new())),
        #[cfg(not(feature = "reqwest"))]
        TransportKind::Reqwest => Err(Error::Configuration(
            "the \"reqwest\" HTTP client requires the `reqwest` feature".to_string(),
        )),
    }
}

/// Blocking transport on top of `ureq`.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    connect_timeout: Duration,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, headers: &[(String, String)]) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

impl HttpTransport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        // Status codes are data here; interpretation belongs to `Response`.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(request.timeout))
            .timeout_connect(Some(self.connect_timeout))
            .build()
            .new_agent();

        let url = request.url.as_str();
        let result = match request.method {
            HttpMethod::Get => with_headers(agent.get(url), &request.headers).call(),
            HttpMethod::Delete => with_headers(agent.delete(url), &request.headers).call(),
            HttpMethod::Post => with_headers(agent.post(url), &request.headers).send(&request.body[..]),
        };
        let mut response = result.map_err(|e| match e {
            ureq::Error::Timeout(_) => TransportError::Timeout {
                url: request.url.clone(),
                timeout: request.timeout,
            },
            other => TransportError::Connection {
                url: request.url.clone(),
                message: other.to_string(),
            },
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        // ureq caps bodies at 10 MiB unless told otherwise.
        let body = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_string()
            .map_err(|e| TransportError::Body {
                url: request.url.clone(),
                message: e.to_string(),
            })?;

        Ok(HttpResponse { status, headers, body })
    }
}

/// Blocking transport on top of `reqwest`.
#[cfg(feature = "reqwest")]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    connect_timeout: Duration,
}

#[cfg(feature = "reqwest")]
impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

#[cfg(feature = "reqwest")]
impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let connection_error = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: request.url.clone(),
                    timeout: request.timeout,
                }
            } else {
                TransportError::Connection {
                    url: request.url.clone(),
                    message: e.to_string(),
                }
            }
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(request.timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(connection_error)?;

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = client.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.method != HttpMethod::Get {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().map_err(connection_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().map_err(|e| TransportError::Body {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        Ok(HttpResponse { status, headers, body })
    }
}
