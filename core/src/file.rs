//! File handles for multipart uploads.
//!
//! # Design
//! A local file is opened when the `UploadableFile` is created, so an
//! unreadable path fails before any request is built. The handle is owned by
//! the value and released when it is dropped; the client drops every file of
//! a call as soon as the request body has been serialized. Remote files
//! (`http://`, `https://`, `ftp://`) are not checked up front and are fetched
//! when their contents are first needed.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::trace;

use crate::error::{Error, Result};

const FALLBACK_MIME_TYPE: &str = "text/plain";

/// Distinguishes video uploads, which get a longer timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Video,
}

#[derive(Debug)]
enum Source {
    Local(fs::File),
    Remote,
}

/// A file to be sent as a multipart part.
#[derive(Debug)]
pub struct UploadableFile {
    path: String,
    max_length: Option<u64>,
    offset: Option<u64>,
    kind: FileKind,
    source: Source,
}

impl UploadableFile {
    /// Open the whole file for upload.
    pub fn open(path: impl Into<String>) -> Result<Self> {
        Self::open_as(path.into(), None, None, FileKind::File)
    }

    /// Open a video for upload.
    pub fn video(path: impl Into<String>) -> Result<Self> {
        Self::open_as(path.into(), None, None, FileKind::Video)
    }

    /// Open at most `max_length` bytes starting at `offset`. `None` means
    /// unbounded and from the start respectively.
    pub fn with_range(
        path: impl Into<String>,
        max_length: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Self> {
        Self::open_as(path.into(), max_length, offset, FileKind::File)
    }

    fn open_as(path: String, max_length: Option<u64>, offset: Option<u64>, kind: FileKind) -> Result<Self> {
        let source = if is_remote(&path) {
            Source::Remote
        } else {
            let file = fs::File::open(&path).map_err(|e| Error::FileUpload {
                path: path.clone(),
                source: Box::new(e),
            })?;
            Source::Local(file)
        };
        trace!(%path, ?kind, "opened upload");
        Ok(Self {
            path,
            max_length,
            offset,
            kind,
            source,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_video(&self) -> bool {
        self.kind == FileKind::Video
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.source, Source::Remote)
    }

    /// Base name of the path, used as the multipart `filename`.
    pub fn file_name(&self) -> String {
        let path = match self.source {
            Source::Remote => self.path.split(['?', '#']).next().unwrap_or_default(),
            Source::Local(_) => self.path.as_str(),
        };
        Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Size on disk. Unknown for remote files.
    pub fn size(&self) -> Option<u64> {
        match &self.source {
            Source::Local(file) => file.metadata().ok().map(|m| m.len()),
            Source::Remote => None,
        }
    }

    pub fn mime_type(&self) -> String {
        mime_guess::from_path(self.file_name())
            .first()
            .map(|mime| mime.to_string())
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
    }

    /// Read the selected byte range.
    pub fn contents(&self) -> Result<Vec<u8>> {
        match &self.source {
            Source::Local(file) => self.read_local(file).map_err(|e| self.read_error(e)),
            Source::Remote => self.fetch_remote(),
        }
    }

    fn read_local(&self, mut file: &fs::File) -> std::io::Result<Vec<u8>> {
        file.seek(SeekFrom::Start(self.offset.unwrap_or(0)))?;
        let mut buf = Vec::new();
        match self.max_length {
            Some(limit) => file.take(limit).read_to_end(&mut buf)?,
            None => file.read_to_end(&mut buf)?,
        };
        Ok(buf)
    }

    fn fetch_remote(&self) -> Result<Vec<u8>> {
        trace!(path = %self.path, "fetching remote upload");
        let mut response = ureq::get(self.path.as_str()).call().map_err(|e| self.read_error(e))?;
        let bytes = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(|e| self.read_error(e))?;

        let start = usize::try_from(self.offset.unwrap_or(0))
            .unwrap_or(usize::MAX)
            .min(bytes.len());
        let end = match self.max_length {
            Some(limit) => start.saturating_add(usize::try_from(limit).unwrap_or(usize::MAX)).min(bytes.len()),
            None => bytes.len(),
        };
        Ok(bytes[start..end].to_vec())
    }

    fn read_error(&self, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::FileUpload {
            path: self.path.clone(),
            source: Box::new(source),
        }
    }

    /// Release the handle now rather than at the end of scope.
    pub fn close(self) {
        trace!(path = %self.path, "closed upload");
    }
}

fn is_remote(path: &str) -> bool {
    ["http://", "https://", "ftp://"]
        .iter()
        .any(|scheme| path.starts_with(scheme))
}
