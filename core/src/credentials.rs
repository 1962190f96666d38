//! Application identity injected into every call.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator used by the persisted `id|secret` form.
const DELIMITER: char = '|';

/// An application id, always held in string form.
///
/// Numeric ids can exceed what some consumers store natively, so integers are
/// normalized to their decimal representation on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppId(String);

impl AppId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AppId {
    fn from(id: &str) -> Self {
        AppId(id.to_string())
    }
}

impl From<String> for AppId {
    fn from(id: String) -> Self {
        AppId(id)
    }
}

impl From<u64> for AppId {
    fn from(id: u64) -> Self {
        AppId(id.to_string())
    }
}

impl From<i64> for AppId {
    fn from(id: i64) -> Self {
        AppId(id.to_string())
    }
}

impl From<u32> for AppId {
    fn from(id: u32) -> Self {
        AppId(id.to_string())
    }
}

/// Immutable id + secret pair.
///
/// Persists as `id|secret`; the `Debug` output never shows the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Credentials {
    id: String,
    secret: String,
}

impl Credentials {
    /// Fails with `Configuration` when the id is empty or contains the
    /// delimiter, since neither would survive the `id|secret` form.
    pub fn new(id: impl Into<AppId>, secret: impl Into<String>) -> Result<Self> {
        let id = id.into().0;
        if id.is_empty() {
            return Err(Error::Configuration("credentials carry an empty app id".to_string()));
        }
        if id.contains(DELIMITER) {
            return Err(Error::Configuration(format!(
                "app id {id:?} must not contain {DELIMITER:?}"
            )));
        }
        Ok(Self {
            id,
            secret: secret.into(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The `id|secret` form used for persistence.
    pub fn to_delimited(&self) -> String {
        format!("{}{DELIMITER}{}", self.id, self.secret)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl FromStr for Credentials {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (id, secret) = s.split_once(DELIMITER).ok_or_else(|| {
            Error::Configuration("credentials must be formatted as \"id|secret\"".to_string())
        })?;
        Credentials::new(id, secret)
    }
}

impl TryFrom<String> for Credentials {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Credentials> for String {
    fn from(credentials: Credentials) -> Self {
        credentials.to_delimited()
    }
}
