//! Several calls sent in one round trip.
//!
//! # Design
//! A `BatchPlan` owns an ordered list of child calls. It is not itself a
//! `Call`: [`BatchPlan::compile`] turns it into one outer POST whose `batch`
//! parameter is a JSON array describing each child. Files attached to children
//! are moved to the outer call under generated keys, so children are always
//! encoded as urlencoded bodies and reference their files by key.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::call::Call;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::file::UploadableFile;

/// The most calls the API accepts in one batch.
pub const BATCH_REQUEST_LIMIT: usize = 50;

/// One child of a batch.
#[derive(Debug)]
pub struct BatchEntry {
    pub name: Option<String>,
    pub call: Call,
    /// Generated keys of the files hoisted out of `call`.
    pub attached_files: Option<Vec<String>>,
}

/// Wire description of one child inside the `batch` parameter.
#[derive(Debug, Serialize)]
struct BatchItem {
    headers: Vec<String>,
    method: String,
    relative_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attached_files: Option<String>,
}

/// A compiled batch: the outer call to send plus the children it describes.
#[derive(Debug)]
pub struct CompiledBatch {
    pub call: Call,
    pub entries: Vec<BatchEntry>,
}

/// An ordered collection of named calls.
#[derive(Debug, Default)]
pub struct BatchPlan {
    credentials: Option<Credentials>,
    entries: Vec<BatchEntry>,
    files: BTreeMap<String, UploadableFile>,
}

impl BatchPlan {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            credentials,
            entries: Vec::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Add one call. A call without credentials inherits the plan's.
    pub fn add(&mut self, mut call: Call, name: Option<String>) -> Result<&mut Self> {
        if call.credentials().is_none() {
            let credentials = self.credentials.clone().ok_or_else(|| {
                Error::MissingCredentials(
                    "batched call has no credentials and the batch has none to lend".to_string(),
                )
            })?;
            call.set_credentials(Some(credentials));
        }

        let attached_files = self.extract_file_attachments(&mut call);
        self.entries.push(BatchEntry {
            name,
            call,
            attached_files,
        });
        Ok(self)
    }

    /// Add calls keyed by name, in iteration order.
    pub fn add_all<K, I>(&mut self, calls: I) -> Result<&mut Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Call)>,
    {
        for (name, call) in calls {
            self.add(call, Some(name.into()))?;
        }
        Ok(self)
    }

    fn extract_file_attachments(&mut self, call: &mut Call) -> Option<Vec<String>> {
        if !call.contains_file_uploads() {
            return None;
        }
        let keys = call
            .take_files()
            .into_values()
            .map(|file| {
                let key = Uuid::new_v4().simple().to_string();
                self.files.insert(key.clone(), file);
                key
            })
            .collect();
        Some(keys)
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Files hoisted from children, keyed by generated name.
    pub fn files(&self) -> &BTreeMap<String, UploadableFile> {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn validate_size(&self) -> Result<()> {
        let count = self.entries.len();
        if count == 0 || count > BATCH_REQUEST_LIMIT {
            return Err(Error::BatchSize {
                count,
                limit: BATCH_REQUEST_LIMIT,
            });
        }
        Ok(())
    }

    /// The `batch` parameter: one JSON object per child, in order.
    pub fn to_json(&self) -> Result<String> {
        let items = self
            .entries
            .iter()
            .map(batch_item)
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::to_string(&items)?)
    }

    /// Validate the size and build the outer call.
    pub fn compile(mut self) -> Result<CompiledBatch> {
        self.validate_size()?;
        let batch = self.to_json()?;

        // A plan built without credentials signs with its first child's.
        let credentials = self
            .credentials
            .clone()
            .or_else(|| self.entries.first().and_then(|e| e.call.credentials().cloned()));
        let mut call = Call::new(credentials, "POST", "");
        call.dangerously_set_params(BTreeMap::from([
            ("batch".to_string(), Value::String(batch)),
            ("include_headers".to_string(), Value::Bool(true)),
        ]));
        let files = std::mem::take(&mut self.files);
        debug!(calls = self.entries.len(), files = files.len(), "compiled batch");
        for (key, file) in files {
            call.add_file(key, file);
        }

        Ok(CompiledBatch {
            call,
            entries: self.entries,
        })
    }
}

fn batch_item(entry: &BatchEntry) -> Result<BatchItem> {
    let call = &entry.call;
    let body = call.url_encoded_body()?.body();
    Ok(BatchItem {
        headers: call
            .headers()
            .into_iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect(),
        method: call.method().to_string(),
        relative_url: call.url()?,
        body: (!body.is_empty()).then_some(body),
        name: entry.name.clone(),
        attached_files: entry.attached_files.as_ref().map(|keys| keys.join(",")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Params;
    use serde_json::json;
    use std::io::Write;

    fn credentials() -> Credentials {
        Credentials::new("9", "s").unwrap()
    }

    fn batch_json(compiled: &CompiledBatch) -> Vec<Value> {
        let raw = compiled.call.raw_params()["batch"].as_str().unwrap();
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn compile_describes_each_child() {
        let mut plan = BatchPlan::new(Some(credentials()));
        plan.add(Call::get(credentials(), "/me").with_etag("\"e1\""), Some("me".to_string()))
            .unwrap();
        plan.add(
            Call::post(credentials(), "/feed").with_params(Params::new().with("message", "hi")),
            None,
        )
        .unwrap();

        let compiled = plan.compile().unwrap();
        assert_eq!(compiled.call.method(), "POST");
        assert_eq!(compiled.call.endpoint(), "");
        assert_eq!(compiled.call.raw_params()["include_headers"], json!(true));

        let items = batch_json(&compiled);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["method"], "GET");
        assert_eq!(items[0]["relative_url"], "/me?app_id=9&app_secret=s");
        assert_eq!(items[0]["name"], "me");
        assert!(items[0].get("body").is_none());
        let headers: Vec<&str> = items[0]["headers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h.as_str().unwrap())
            .collect();
        assert!(headers.contains(&"If-None-Match: \"e1\""));
        assert!(headers.contains(&"Accept-Encoding: *"));

        assert_eq!(items[1]["method"], "POST");
        assert_eq!(items[1]["relative_url"], "/feed");
        assert_eq!(items[1]["body"], "app_id=9&app_secret=s&message=hi");
        assert!(items[1].get("name").is_none());
        assert_eq!(compiled.entries.len(), 2);
    }

    #[test]
    fn size_bounds() {
        let empty = BatchPlan::new(Some(credentials()));
        assert!(matches!(
            empty.compile(),
            Err(Error::BatchSize { count: 0, limit: BATCH_REQUEST_LIMIT })
        ));

        let mut full = BatchPlan::new(Some(credentials()));
        for i in 0..BATCH_REQUEST_LIMIT {
            full.add(Call::get(credentials(), &format!("/items/{i}")), None).unwrap();
        }
        let compiled = full.compile().unwrap();
        assert_eq!(batch_json(&compiled).len(), BATCH_REQUEST_LIMIT);

        let mut over = BatchPlan::new(Some(credentials()));
        for i in 0..=BATCH_REQUEST_LIMIT {
            over.add(Call::get(credentials(), &format!("/items/{i}")), None).unwrap();
        }
        assert!(matches!(over.compile(), Err(Error::BatchSize { count: 51, .. })));
    }

    #[test]
    fn single_call_batch_compiles() {
        let mut plan = BatchPlan::new(Some(credentials()));
        plan.add(Call::get(credentials(), "/me"), None).unwrap();
        assert_eq!(batch_json(&plan.compile().unwrap()).len(), 1);
    }

    #[test]
    fn children_inherit_plan_credentials() {
        let mut plan = BatchPlan::new(Some(credentials()));
        plan.add(Call::new(None, "GET", "/me"), None).unwrap();
        assert_eq!(plan.entries()[0].call.credentials().unwrap().id(), "9");
    }

    #[test]
    fn children_without_any_credentials_are_rejected() {
        let mut plan = BatchPlan::new(None);
        let err = plan.add(Call::new(None, "GET", "/me"), None).unwrap_err();
        assert!(matches!(err, Error::MissingCredentials(_)));
        assert!(plan.is_empty());
    }

    #[test]
    fn files_are_hoisted_under_generated_keys() {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(b"png").unwrap();
        let file = UploadableFile::open(tmp.path().to_str().unwrap()).unwrap();

        let mut plan = BatchPlan::new(Some(credentials()));
        plan.add_all([(
            "upload",
            Call::post(credentials(), "/photos").with_params(Params::new().with_file("source", file)),
        )])
        .unwrap();

        let entry = &plan.entries()[0];
        assert!(!entry.call.contains_file_uploads());
        let keys = entry.attached_files.clone().unwrap();
        assert_eq!(keys.len(), 1);
        assert_ne!(keys[0], "source");
        assert!(plan.files().contains_key(&keys[0]));

        let compiled = plan.compile().unwrap();
        assert!(compiled.call.files().contains_key(&keys[0]));
        let items = batch_json(&compiled);
        assert_eq!(items[0]["attached_files"], json!(keys[0]));
        assert_eq!(items[0]["name"], "upload");
    }

    #[test]
    fn invalid_child_method_fails_compile() {
        let mut plan = BatchPlan::new(Some(credentials()));
        plan.add(Call::new(Some(credentials()), "PUT", "/me"), None).unwrap();
        assert!(matches!(plan.compile(), Err(Error::InvalidMethod(_))));
    }
}
