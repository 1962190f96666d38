//! Convenience entry point bundling credentials and a client.

use crate::batch::BatchPlan;
use crate::call::{Call, Params};
use crate::client::Client;
use crate::config::ClientConfig;
use crate::credentials::Credentials;
use crate::error::Result;
use crate::file::UploadableFile;
use crate::http::HttpTransport;
use crate::response::{BatchResponse, Response};
use crate::transport::transport_for;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Signs every call with one application's credentials.
#[derive(Debug)]
pub struct Hodela {
    credentials: Credentials,
    client: Client,
}

impl Hodela {
    /// Build from configuration, using the transport it names.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let credentials = config.credentials()?;
        let transport = transport_for(config.transport)?;
        Ok(Self {
            credentials,
            client: Client::with_base_url(transport, &config.base_url),
        })
    }

    /// Build with an injected transport.
    pub fn with_transport(config: ClientConfig, transport: impl HttpTransport + 'static) -> Result<Self> {
        Ok(Self {
            credentials: config.credentials()?,
            client: Client::with_base_url(transport, &config.base_url),
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn get(&self, endpoint: &str, etag: Option<&str>) -> Result<Response> {
        self.send_request("GET", endpoint, Params::new(), etag)
    }

    pub fn post(&self, endpoint: &str, params: Params, etag: Option<&str>) -> Result<Response> {
        self.send_request("POST", endpoint, params, etag)
    }

    pub fn delete(&self, endpoint: &str, params: Params, etag: Option<&str>) -> Result<Response> {
        self.send_request("DELETE", endpoint, params, etag)
    }

    pub fn send_request(
        &self,
        method: &str,
        endpoint: &str,
        params: Params,
        etag: Option<&str>,
    ) -> Result<Response> {
        self.client.send(self.request(method, endpoint, params, etag))
    }

    /// A call signed with this application's credentials.
    pub fn request(&self, method: &str, endpoint: &str, params: Params, etag: Option<&str>) -> Call {
        let mut call = Call::new(Some(self.credentials.clone()), method, endpoint).with_params(params);
        call.set_etag(etag.map(str::to_string));
        call
    }

    /// An empty batch that lends this application's credentials to its calls.
    pub fn batch(&self) -> BatchPlan {
        BatchPlan::new(Some(self.credentials.clone()))
    }

    /// Send named calls as one batch.
    pub fn send_batch_request<K, I>(&self, calls: I) -> Result<BatchResponse>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Call)>,
    {
        let mut plan = self.batch();
        plan.add_all(calls)?;
        self.client.send_batch(plan)
    }

    pub fn file_to_upload(&self, path: &str) -> Result<UploadableFile> {
        UploadableFile::open(path)
    }

    pub fn video_to_upload(&self, path: &str) -> Result<UploadableFile> {
        UploadableFile::video(path)
    }
}
