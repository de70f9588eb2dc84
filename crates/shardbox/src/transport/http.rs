//! http transport - reqwest against a node's json api

use async_trait::async_trait;

use crate::transport::{Method, Request, Transport};
use crate::{Error, Result};

/// api root appended to every node url
pub const DEFAULT_API_PREFIX: &str = "/api/v1";

/// reqwest-backed transport to one node
#[derive(Clone, Debug)]
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// node at `node_url`, requests go to `{node_url}/api/v1{path}`
    pub fn new(node_url: &str) -> Result<Self> {
        Self::with_prefix(node_url, DEFAULT_API_PREFIX)
    }

    pub fn with_prefix(node_url: &str, api_prefix: &str) -> Result<Self> {
        Self::with_client(node_url, api_prefix, reqwest::Client::new())
    }

    /// share a client (and its connection pool / timeouts) across nodes
    pub fn with_client(node_url: &str, api_prefix: &str, http: reqwest::Client) -> Result<Self> {
        let base_url = format!(
            "{}/{}",
            node_url.trim_end_matches('/'),
            api_prefix.trim_matches('/')
        );
        reqwest::Url::parse(&base_url).map_err(|e| Error::InvalidUrl(format!("{}: {}", base_url, e)))?;

        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Head => reqwest::Method::HEAD,
        };

        let mut builder = self
            .http
            .request(method, &url)
            .header("Accept", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http { status: status.as_u16() });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(body.to_vec())
    }
}
