//! Request body encoders.
//!
//! # Design
//! A call without files is sent as `application/x-www-form-urlencoded`; a
//! call with at least one file is sent as `multipart/form-data`. Both encoders
//! take the already-flattened parameter set so nested values are encoded the
//! same way in either form.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::file::UploadableFile;
use crate::urls::{build_query, flatten_params};

pub const URL_ENCODED_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// `a=1&b=2` encoding of a parameter set.
#[derive(Debug, Clone, Default)]
pub struct UrlEncodedBody {
    params: BTreeMap<String, Value>,
}

impl UrlEncodedBody {
    pub fn new(params: BTreeMap<String, Value>) -> Self {
        Self { params }
    }

    pub fn body(&self) -> String {
        build_query(&self.params)
    }

    pub fn content_type(&self) -> &'static str {
        URL_ENCODED_CONTENT_TYPE
    }
}

#[derive(Debug, Clone)]
struct FilePart {
    name: String,
    file_name: String,
    mime_type: String,
    contents: Vec<u8>,
}

/// `multipart/form-data` encoding of parameters plus files.
///
/// File contents are read when the body is constructed, so the handles can
/// be released as soon as this value exists.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    fields: Vec<(String, String)>,
    files: Vec<FilePart>,
}

impl MultipartBody {
    pub fn new(
        params: &BTreeMap<String, Value>,
        files: &BTreeMap<String, UploadableFile>,
        boundary: Option<String>,
    ) -> Result<Self> {
        let files = files
            .iter()
            .map(|(name, file)| {
                Ok(FilePart {
                    name: name.clone(),
                    file_name: file.file_name(),
                    mime_type: file.mime_type(),
                    contents: file.contents()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            boundary: boundary.unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            fields: flatten_params(params),
            files,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in &self.fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{value}\r\n",
                    self.boundary,
                    escape_quoted(name)
                )
                .as_bytes(),
            );
        }
        for part in &self.files {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    self.boundary,
                    escape_quoted(&part.name),
                    escape_quoted(&part.file_name),
                    part.mime_type
                )
                .as_bytes(),
            );
            body.extend_from_slice(&part.contents);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        body
    }
}

/// Percent-escape the characters that would end a quoted header value or
/// the header line itself, as browsers do for form names and filenames.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
