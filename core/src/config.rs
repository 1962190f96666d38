//! Client configuration.
//!
//! Values can be deserialized from any serde source or read from the
//! environment with [`ClientConfig::from_env`]. Values that were set
//! explicitly are kept; only unset or default ones take environment fallbacks.

use serde::Deserialize;

use crate::client::BASE_API_URL;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::transport::TransportKind;

pub const APP_ID_ENV_NAME: &str = "HODELA_APP_ID";
pub const APP_SECRET_ENV_NAME: &str = "HODELA_APP_SECRET";
pub const BASE_URL_ENV_NAME: &str = "HODELA_BASE_URL";
pub const HTTP_CLIENT_ENV_NAME: &str = "HODELA_HTTP_CLIENT";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub base_url: String,
    pub transport: TransportKind,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_secret: None,
            base_url: BASE_API_URL.to_string(),
            transport: TransportKind::default(),
        }
    }
}

impl ClientConfig {
    /// Read every setting from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_fallbacks(|name| std::env::var(name).ok())
    }

    /// Fill unset values from `lookup`, typically an environment reader.
    pub fn with_fallbacks(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());
        if self.app_id.is_none() {
            self.app_id = lookup(APP_ID_ENV_NAME);
        }
        if self.app_secret.is_none() {
            self.app_secret = lookup(APP_SECRET_ENV_NAME);
        }
        if self.base_url == BASE_API_URL {
            if let Some(base_url) = lookup(BASE_URL_ENV_NAME) {
                self.base_url = base_url;
            }
        }
        if self.transport == TransportKind::default() {
            if let Some(kind) = lookup(HTTP_CLIENT_ENV_NAME) {
                self.transport = kind.parse()?;
            }
        }
        Ok(self)
    }

    /// The configured identity. Both parts are required.
    pub fn credentials(&self) -> Result<Credentials> {
        let id = required(&self.app_id, "app_id", APP_ID_ENV_NAME)?;
        let secret = required(&self.app_secret, "app_secret", APP_SECRET_ENV_NAME)?;
        Credentials::new(id, secret)
    }
}

fn required<'a>(value: &'a Option<String>, key: &str, env_name: &str) -> Result<&'a str> {
    value.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
        Error::Configuration(format!(
            "required \"{key}\" not supplied in config and no fallback environment variable \"{env_name}\""
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, BASE_API_URL);
        assert_eq!(config.transport, TransportKind::Ureq);
        assert!(matches!(config.credentials(), Err(Error::Configuration(_))));
    }

    #[test]
    fn environment_fills_missing_values() {
        let config = ClientConfig::default()
            .with_fallbacks(env(&[
                (APP_ID_ENV_NAME, "123"),
                (APP_SECRET_ENV_NAME, "shh"),
                (BASE_URL_ENV_NAME, "http://localhost:3000"),
                (HTTP_CLIENT_ENV_NAME, "reqwest"),
            ]))
            .unwrap();
        let credentials = config.credentials().unwrap();
        assert_eq!(credentials.id(), "123");
        assert_eq!(credentials.secret(), "shh");
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.transport, TransportKind::Reqwest);
    }

    #[test]
    fn explicit_values_win() {
        let config = ClientConfig {
            app_id: Some("1".to_string()),
            app_secret: Some("x".to_string()),
            ..ClientConfig::default()
        }
        .with_fallbacks(env(&[(APP_ID_ENV_NAME, "2"), (APP_SECRET_ENV_NAME, "y")]))
        .unwrap();
        assert_eq!(config.credentials().unwrap().id(), "1");
    }

    #[test]
    fn unknown_http_client_is_rejected() {
        let err = ClientConfig::default()
            .with_fallbacks(env(&[(HTTP_CLIENT_ENV_NAME, "curl")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn empty_secret_is_missing() {
        let config = ClientConfig {
            app_id: Some("1".to_string()),
            app_secret: Some(String::new()),
            ..ClientConfig::default()
        };
        let err = config.credentials().unwrap_err();
        assert!(err.to_string().contains("app_secret"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"app_id":"5","app_secret":"z","transport":"ureq"}"#).unwrap();
        assert_eq!(config.base_url, BASE_API_URL);
        assert_eq!(config.credentials().unwrap().id(), "5");
    }
}
