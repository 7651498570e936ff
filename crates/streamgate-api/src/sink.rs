// Outbound delivery over HTTP
//
// A sink is a single URL that accepts event bodies by POST. Any 2xx
// status counts as delivered; everything else is reported as
// `Error::Sink` so callers can decide whether to retry.

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

pub struct SinkClient {
    http: reqwest::Client,
    url: Url,
    content_type: String,
}

impl SinkClient {
    pub fn new(url: Url, content_type: impl Into<String>, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, url, content_type))
    }

    /// Create a sink client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, url: Url, content_type: impl Into<String>) -> Self {
        Self {
            http,
            url,
            content_type: content_type.into(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST one body. Returns the (2xx) status on success.
    pub async fn deliver(&self, body: Bytes, authorization: Option<&str>) -> Result<u16, Error> {
        let mut request = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, self.content_type.as_str())
            .body(body);
        if let Some(auth) = authorization {
            request = request.header(AUTHORIZATION, auth);
        }

        let resp = request.send().await.map_err(Error::Transport)?;
        let status = resp.status();
        if status.is_success() {
            debug!(url = %self.url, status = status.as_u16(), "delivered");
            return Ok(status.as_u16());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(Error::Sink {
            status: status.as_u16(),
            body,
        })
    }
}
