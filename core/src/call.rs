//! A single logical API call.
//!
//! # Design
//! A `Call` is mutable while its owner assembles it and is handed to the
//! client by value. `app_id` and `app_secret` never come from the caller: they
//! are filtered out of every parameter assignment and of the endpoint's query
//! string, and are injected from the call's `Credentials` only when the URL
//! or body is built. Method validation is deferred to that point as well, so
//! an invalid call fails before anything is sent.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::body::{MultipartBody, UrlEncodedBody};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::file::UploadableFile;
use crate::http::HttpMethod;
use crate::urls::{append_params_to_url, force_slash_prefix, remove_params_from_url};

/// Parameter keys reserved for credential injection.
pub const CREDENTIAL_PARAMS: [&str; 2] = ["app_id", "app_secret"];

pub const USER_AGENT: &str = concat!("hdl-rust-", env!("CARGO_PKG_VERSION"));

/// One parameter value: either plain data or a file to upload.
#[derive(Debug)]
pub enum Param {
    Value(Value),
    File(UploadableFile),
}

/// An ordered set of parameters handed to [`Call::set_params`].
#[derive(Debug, Default)]
pub struct Params {
    entries: Vec<(String, Param)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_file(mut self, key: impl Into<String>, file: UploadableFile) -> Self {
        self.insert_file(key, file);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((key.into(), Param::Value(value.into())));
    }

    pub fn insert_file(&mut self, key: impl Into<String>, file: UploadableFile) {
        self.entries.push((key.into(), Param::File(file)));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// A single request destined for one HTTP exchange.
#[derive(Debug)]
pub struct Call {
    credentials: Option<Credentials>,
    method: String,
    endpoint: String,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, Value>,
    files: BTreeMap<String, UploadableFile>,
    etag: Option<String>,
}

impl Call {
    pub fn new(credentials: Option<Credentials>, method: &str, endpoint: &str) -> Self {
        let mut call = Call {
            credentials,
            method: String::new(),
            endpoint: String::new(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            files: BTreeMap::new(),
            etag: None,
        };
        call.set_method(method);
        call.set_endpoint(endpoint);
        call
    }

    pub fn get(credentials: Credentials, endpoint: &str) -> Self {
        Call::new(Some(credentials), "GET", endpoint)
    }

    pub fn post(credentials: Credentials, endpoint: &str) -> Self {
        Call::new(Some(credentials), "POST", endpoint)
    }

    pub fn delete(credentials: Credentials, endpoint: &str) -> Self {
        Call::new(Some(credentials), "DELETE", endpoint)
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.set_params(params);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: &str) {
        self.method = method.to_ascii_uppercase();
    }

    /// Fails with `InvalidMethod` unless the method is GET, POST or DELETE.
    pub fn validate_method(&self) -> Result<HttpMethod> {
        self.method.parse()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: &str) {
        self.endpoint = remove_params_from_url(endpoint, &CREDENTIAL_PARAMS);
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn set_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }

    /// Merge caller headers; later values win.
    pub fn set_headers<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Caller headers overlaid with the defaults and `If-None-Match`.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.headers.clone();
        headers.extend(Self::default_headers());
        if let Some(etag) = self.etag.as_deref().filter(|etag| !etag.is_empty()) {
            headers.insert("If-None-Match".to_string(), etag.to_string());
        }
        headers
    }

    pub fn default_headers() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            ("Accept-Encoding".to_string(), "*".to_string()),
        ])
    }

    /// Filter credential keys, pull out files and merge the rest.
    pub fn set_params(&mut self, params: Params) -> &mut Self {
        let mut values = BTreeMap::new();
        for (key, param) in params.entries {
            if CREDENTIAL_PARAMS.contains(&key.as_str()) {
                continue;
            }
            match param {
                Param::Value(value) => {
                    values.insert(key, value);
                }
                Param::File(file) => self.add_file(key, file),
            }
        }
        self.dangerously_set_params(values)
    }

    /// Merge parameters without filtering credential keys or files.
    pub fn dangerously_set_params(&mut self, params: BTreeMap<String, Value>) -> &mut Self {
        self.params.extend(params);
        self
    }

    /// Stored parameters, before credential injection.
    pub fn raw_params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Parameters with `app_id` / `app_secret` filled from the credentials.
    pub fn params(&self) -> Result<BTreeMap<String, Value>> {
        let mut params = self.params.clone();
        let needs_id = is_blank(params.get("app_id"));
        let needs_secret = is_blank(params.get("app_secret"));
        if needs_id || needs_secret {
            let credentials = self.credentials.as_ref().ok_or_else(|| {
                Error::MissingCredentials(format!(
                    "{} {} has no credentials to sign with",
                    self.method,
                    force_slash_prefix(&self.endpoint)
                ))
            })?;
            if needs_id {
                params.insert("app_id".to_string(), Value::String(credentials.id().to_string()));
            }
            if needs_secret {
                params.insert(
                    "app_secret".to_string(),
                    Value::String(credentials.secret().to_string()),
                );
            }
        }
        Ok(params)
    }

    /// Parameters that travel in the body: all of them for POST, none otherwise.
    pub fn post_params(&self) -> Result<BTreeMap<String, Value>> {
        if self.method == HttpMethod::Post.as_str() {
            self.params()
        } else {
            Ok(BTreeMap::new())
        }
    }

    pub fn add_file(&mut self, key: impl Into<String>, file: UploadableFile) {
        self.files.insert(key.into(), file);
    }

    pub fn files(&self) -> &BTreeMap<String, UploadableFile> {
        &self.files
    }

    /// Move the files out, leaving the call without uploads.
    pub fn take_files(&mut self) -> BTreeMap<String, UploadableFile> {
        std::mem::take(&mut self.files)
    }

    /// Drop every file, releasing their handles.
    pub fn reset_files(&mut self) {
        self.files.clear();
    }

    pub fn contains_file_uploads(&self) -> bool {
        !self.files.is_empty()
    }

    pub fn contains_video_uploads(&self) -> bool {
        self.files.values().any(UploadableFile::is_video)
    }

    /// Relative URL: endpoint plus, for GET and DELETE, the signed query.
    pub fn url(&self) -> Result<String> {
        let method = self.validate_method()?;
        let url = force_slash_prefix(&self.endpoint);
        if method == HttpMethod::Post {
            return Ok(url);
        }
        Ok(append_params_to_url(&url, &self.params()?))
    }

    pub fn url_encoded_body(&self) -> Result<UrlEncodedBody> {
        Ok(UrlEncodedBody::new(self.post_params()?))
    }

    pub fn multipart_body(&self) -> Result<MultipartBody> {
        MultipartBody::new(&self.post_params()?, &self.files, None)
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}
