//! Sends calls through a transport and decodes the replies.
//!
//! # Design
//! `Client` holds a base URL, the transport it was built with, and a request
//! counter. Each operation is split into [`Client::prepare`], which turns a
//! `Call` into an `HttpRequest`, and [`Client::send`], which executes it and
//! decodes the reply. The transport never changes after construction.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::batch::BatchPlan;
use crate::call::Call;
use crate::error::Result;
use crate::http::{HttpRequest, HttpTransport};
use crate::response::{BatchResponse, Response};

pub const BASE_API_URL: &str = "http://api.page.mava";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_FILE_UPLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(3600);
pub const DEFAULT_VIDEO_UPLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(7200);

/// Synchronous client for the Hodela API.
pub struct Client {
    base_url: String,
    transport: Box<dyn HttpTransport>,
    request_count: AtomicU64,
}

impl Client {
    pub fn new(transport: impl HttpTransport + 'static) -> Self {
        Self::with_base_url(transport, BASE_API_URL)
    }

    pub fn with_base_url(transport: impl HttpTransport + 'static, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport: Box::new(transport),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Number of requests that reached the transport and returned.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Serialize `call` into a transport request.
    ///
    /// Sets the `Content-Type` header on the call: multipart when it carries
    /// files, urlencoded otherwise.
    pub fn prepare(&self, call: &mut Call) -> Result<HttpRequest> {
        let method = call.validate_method()?;
        let url = format!("{}{}", self.base_url, call.url()?);

        let body = if call.contains_file_uploads() {
            let body = call.multipart_body()?;
            call.set_headers([("Content-Type", body.content_type())]);
            body.body()
        } else {
            let body = call.url_encoded_body()?;
            call.set_headers([("Content-Type", body.content_type())]);
            body.body().into_bytes()
        };

        Ok(HttpRequest {
            method,
            url,
            headers: call.headers().into_iter().collect(),
            body,
            timeout: timeout_for(call),
        })
    }

    /// Send one call. An error payload in the reply is raised as `Error::Api`.
    pub fn send(&self, mut call: Call) -> Result<Response> {
        let request = self.prepare(&mut call)?;
        // The body holds the file contents now; release the handles.
        call.reset_files();

        debug!(
            method = %request.method,
            url = %request.url,
            timeout_secs = request.timeout.as_secs(),
            bytes = request.body.len(),
            "sending request"
        );
        let raw = self.transport.send(&request)?;
        let count = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            status = raw.status,
            bytes = raw.body.len(),
            request_number = count,
            "received response"
        );

        let response = Response::new(call, raw.body, raw.status, raw.headers.into_iter().collect());
        if let Some(err) = response.error() {
            warn!(code = ?err.code, kind = %err.kind, status = err.http_status, "API returned an error");
        }
        response.into_result()
    }

    /// Compile and send a batch, then split the reply per call.
    pub fn send_batch(&self, plan: BatchPlan) -> Result<BatchResponse> {
        let compiled = plan.compile()?;
        let response = self.send(compiled.call)?;
        Ok(BatchResponse::new(response, compiled.entries))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("request_count", &self.request_count())
            .finish_non_exhaustive()
    }
}

/// Uploads get longer timeouts; video is checked first.
pub fn timeout_for(call: &Call) -> Duration {
    if call.contains_video_uploads() {
        DEFAULT_VIDEO_UPLOAD_REQUEST_TIMEOUT
    } else if call.contains_file_uploads() {
        DEFAULT_FILE_UPLOAD_REQUEST_TIMEOUT
    } else {
        DEFAULT_REQUEST_TIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Params;
    use crate::credentials::Credentials;
    use crate::error::{ApiErrorKind, Error, TransportError};
    use crate::file::UploadableFile;
    use crate::http::{HttpMethod, HttpResponse};
    use std::io::Write;

    struct Canned {
        status: u16,
        body: &'static str,
    }

    impl HttpTransport for Canned {
        fn send(&self, _request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
            Ok(HttpResponse {
                status: self.status,
                headers: vec![("ETag".to_string(), "\"t\"".to_string())],
                body: self.body.to_string(),
            })
        }
    }

    struct Unreachable;

    impl HttpTransport for Unreachable {
        fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
            Err(TransportError::Connection {
                url: request.url.clone(),
                message: "connection refused".to_string(),
            })
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("9", "s").unwrap()
    }

    fn client(body: &'static str) -> Client {
        Client::with_base_url(Canned { status: 200, body }, "http://localhost:3000/")
    }

    fn tmp(suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(b"bytes").unwrap();
        file
    }

    #[test]
    fn prepare_get_request() {
        let mut call = Call::get(credentials(), "/users/1");
        let req = client("{}").prepare(&mut call).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:3000/users/1?app_id=9&app_secret=s");
        assert!(req.body.is_empty());
        assert_eq!(req.header("Content-Type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(req.timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn prepare_post_with_file_is_multipart() {
        let file = tmp(".jpg");
        let mut call = Call::post(credentials(), "/photos").with_params(
            Params::new()
                .with("caption", "hi")
                .with_file("source", UploadableFile::open(file.path().to_str().unwrap()).unwrap()),
        );
        let req = client("{}").prepare(&mut call).unwrap();
        let content_type = req.header("Content-Type").unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let body = String::from_utf8(req.body).unwrap();
        assert!(body.contains("name=\"caption\"\r\n\r\nhi\r\n"));
        assert!(body.contains("name=\"source\""));
        assert!(body.contains("\r\n\r\nbytes\r\n"));
        assert_eq!(req.timeout, DEFAULT_FILE_UPLOAD_REQUEST_TIMEOUT);
    }

    #[test]
    fn video_takes_precedence_in_timeout() {
        let image = tmp(".jpg");
        let video = tmp(".mp4");
        let mut call = Call::post(credentials(), "/videos");
        call.add_file("thumb", UploadableFile::open(image.path().to_str().unwrap()).unwrap());
        call.add_file("source", UploadableFile::video(video.path().to_str().unwrap()).unwrap());
        assert_eq!(timeout_for(&call), DEFAULT_VIDEO_UPLOAD_REQUEST_TIMEOUT);
    }

    #[test]
    fn send_decodes_and_counts() {
        let client = client("{\"name\":\"An\"}");
        let response = client.send(Call::get(credentials(), "/users/1")).unwrap();
        assert_eq!(response.decoded_body()["name"], "An");
        assert_eq!(response.etag(), Some("\"t\""));
        assert_eq!(client.request_count(), 1);
        client.send(Call::get(credentials(), "/users/2")).unwrap();
        assert_eq!(client.request_count(), 2);
    }

    #[test]
    fn send_releases_files() {
        let file = tmp(".png");
        let call = Call::post(credentials(), "/photos")
            .with_params(Params::new().with_file("source", UploadableFile::open(file.path().to_str().unwrap()).unwrap()));
        let response = client("true").send(call).unwrap();
        assert!(!response.request().contains_file_uploads());
        assert_eq!(response.decoded_body()["success"], true);
    }

    #[test]
    fn send_raises_api_errors() {
        let client = client(r#"{"error":1,"error":{"code":3,"message":"slow down"}}"#);
        let err = client.send(Call::get(credentials(), "/me")).unwrap_err();
        assert!(matches!(err, Error::Api(ref e) if e.kind == ApiErrorKind::Throttle && e.message == "slow down"));
        assert_eq!(client.request_count(), 1);
    }

    #[test]
    fn invalid_calls_never_reach_the_transport() {
        let client = client("{}");
        let err = client.send(Call::new(Some(credentials()), "PUT", "/me")).unwrap_err();
        assert!(matches!(err, Error::InvalidMethod(_)));
        let err = client.send(Call::new(None, "GET", "/me")).unwrap_err();
        assert!(matches!(err, Error::MissingCredentials(_)));
        assert_eq!(client.request_count(), 0);
    }

    #[test]
    fn transport_errors_propagate() {
        let client = Client::new(Unreachable);
        let err = client.send(Call::get(credentials(), "/me")).unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Connection { .. })));
        assert_eq!(client.request_count(), 0);
    }

    #[test]
    fn default_base_url() {
        assert_eq!(Client::new(Unreachable).base_url(), BASE_API_URL);
    }

    #[test]
    fn send_batch_splits_replies() {
        let client = client(r#"[{"code":200,"headers":[],"body":"{\"id\":\"1\"}"},{"code":200,"headers":[],"body":"true"}]"#);
        let mut plan = BatchPlan::new(Some(credentials()));
        plan.add_all([
            ("user", Call::get(credentials(), "/users/1")),
            ("remove", Call::delete(credentials(), "/posts/1")),
        ])
        .unwrap();
        let batch = client.send_batch(plan).unwrap();
        assert_eq!(batch.get("user").unwrap().decoded_body()["id"], "1");
        assert_eq!(batch.get("remove").unwrap().decoded_body()["success"], true);
        assert_eq!(client.request_count(), 1);
    }

    #[test]
    fn empty_batch_is_rejected_before_sending() {
        let client = client("[]");
        let err = client.send_batch(BatchPlan::new(Some(credentials()))).unwrap_err();
        assert!(matches!(err, Error::BatchSize { count: 0, .. }));
        assert_eq!(client.request_count(), 0);
    }
}
