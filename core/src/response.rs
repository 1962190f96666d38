//! Decoded replies.
//!
//! # Design
//! A `Response` decodes its body exactly once, when it is built. The body is
//! parsed as JSON and, failing that, as a urlencoded string. Scalars are
//! wrapped (`true` becomes `{"success": true}`, `42` becomes `{"id": 42}`) so
//! callers always see an object, or an array for batch replies.
//!
//! A reply is an error when a top-level `error` member is the integer `1`.
//! Error replies often repeat the `error` key (`{"error":1,"error":{...}}`),
//! so the marker is looked for across every `error` entry rather than in the
//! collapsed map. The classified [`ApiError`] is built at decode time but
//! never raised here; `Client::send` decides that.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{trace, warn};
use url::form_urlencoded;

use crate::batch::BatchEntry;
use crate::call::Call;
use crate::error::{ApiError, Result};

/// The decoded outcome of one HTTP exchange.
#[derive(Debug)]
pub struct Response {
    request: Call,
    body: String,
    status: u16,
    headers: BTreeMap<String, String>,
    decoded: Value,
    error: Option<ApiError>,
}

impl Response {
    pub fn new(
        request: Call,
        body: impl Into<String>,
        status: u16,
        headers: BTreeMap<String, String>,
    ) -> Self {
        let body = body.into();
        let (decoded, flagged) = decode_body(&body);
        let error = match (&decoded, flagged) {
            (Value::Object(map), true) => Some(ApiError::classify(map, status, &body)),
            _ => None,
        };
        Self {
            request,
            body,
            status,
            headers,
            decoded,
            error,
        }
    }

    pub fn request(&self) -> &Call {
        &self.request
    }

    pub fn into_request(self) -> Call {
        self.request
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("ETag")
    }

    /// The raw reply body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Always an object, or an array for batch replies.
    pub fn decoded_body(&self) -> &Value {
        &self.decoded
    }

    /// The decoded body when it is an object.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.decoded.as_object()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    /// Raise the classified error, if any.
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self),
        }
    }
}

/// Decode a raw body, returning the value and whether it carries the error marker.
pub(crate) fn decode_body(raw: &str) -> (Value, bool) {
    let parsed = serde_json::from_str::<Value>(raw)
        .ok()
        .filter(|value| !value.is_null());

    let decoded = match parsed {
        None if raw.is_empty() => Value::Object(Map::new()),
        None => {
            trace!(bytes = raw.len(), "reply is not JSON, decoding as urlencoded");
            Value::Object(
                form_urlencoded::parse(raw.as_bytes())
                    .into_owned()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect(),
            )
        }
        Some(Value::Bool(success)) => json!({ "success": success }),
        Some(id @ Value::Number(_)) => json!({ "id": id }),
        Some(value @ (Value::Object(_) | Value::Array(_))) => value,
        Some(_) => Value::Object(Map::new()),
    };

    let flagged = decoded.is_object()
        && serde_json::from_str::<ErrorMarker>(raw)
            .map(|marker| marker.0)
            .unwrap_or(false);
    (decoded, flagged)
}

/// Whether any top-level `error` entry of a JSON object is the integer 1.
struct ErrorMarker(bool);

impl<'de> Deserialize<'de> for ErrorMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MarkerVisitor;

        impl<'de> Visitor<'de> for MarkerVisitor {
            type Value = ErrorMarker;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<ErrorMarker, A::Error> {
                let mut flagged = false;
                while let Some(key) = map.next_key::<String>()? {
                    if key == "error" {
                        let value: Value = map.next_value()?;
                        flagged |= value.as_i64() == Some(1);
                    } else {
                        map.next_value::<IgnoredAny>()?;
                    }
                }
                Ok(ErrorMarker(flagged))
            }
        }

        deserializer.deserialize_map(MarkerVisitor)
    }
}

/// A batch reply split into one `Response` per child.
#[derive(Debug)]
pub struct BatchResponse {
    response: Response,
    responses: Vec<(String, Response)>,
}

impl BatchResponse {
    /// Pair each element of the decoded reply array with the child at the same
    /// position. Children are keyed by name, or by position when unnamed.
    pub fn new(response: Response, entries: Vec<BatchEntry>) -> Self {
        let mut entries: Vec<Option<BatchEntry>> = entries.into_iter().map(Some).collect();
        let replies = match response.decoded_body().as_array() {
            Some(replies) => replies.clone(),
            None => {
                warn!(calls = entries.len(), "batch reply is not an array");
                Vec::new()
            }
        };
        if replies.len() < entries.len() {
            warn!(
                calls = entries.len(),
                replies = replies.len(),
                "batch reply is missing results for some calls"
            );
        }

        let mut responses = Vec::with_capacity(replies.len());
        for (index, reply) in replies.iter().enumerate() {
            let Some(entry) = entries.get_mut(index).and_then(Option::take) else {
                warn!(index, "batch reply has more elements than the batch had calls");
                continue;
            };
            let key = entry.name.unwrap_or_else(|| index.to_string());
            responses.push((key, inner_response(entry.call, reply)));
        }

        Self {
            response,
            responses,
        }
    }

    /// The outer reply that carried the batch.
    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn get(&self, key: &str) -> Option<&Response> {
        self.responses
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, response)| response)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Response)> {
        self.responses
            .iter()
            .map(|(name, response)| (name.as_str(), response))
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn into_responses(self) -> Vec<(String, Response)> {
        self.responses
    }
}

/// One element of a batch reply: `{code, headers: [{name, value}], body}`.
fn inner_response(call: Call, reply: &Value) -> Response {
    let body = reply.get("body").and_then(Value::as_str).unwrap_or_default();
    let status = reply
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or_default();
    let headers = reply
        .get("headers")
        .and_then(Value::as_array)
        .map(|headers| normalize_batch_headers(headers))
        .unwrap_or_default();
    Response::new(call, body, status, headers)
}

fn normalize_batch_headers(headers: &[Value]) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|header| {
            let name = header.get("name")?.as_str()?;
            let value = header.get("value")?.as_str()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
