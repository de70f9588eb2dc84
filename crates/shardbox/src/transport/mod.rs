//! request/response channel to a storage node
//!
//! the orchestrator never talks http itself. a transport takes a
//! [`Request`] and hands back the raw response body, or an error:
//! - non-2xx status: [`Error::Http`](crate::Error::Http)
//! - connectivity: [`Error::Network`](crate::Error::Network)
//!
//! implementations:
//! - memory: in-process node for tests and local runs
//! - http: reqwest against a real node

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "network")]
pub mod http;

use async_trait::async_trait;

use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// one call against a node's api, path relative to the api root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// json body, only sent with post
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::Head, path)
    }

    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::Post, path)
        }
        .header("Content-Type", "application/json")
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// bearer token issued by the identity provider
    pub fn authorization(self, token: &str) -> Self {
        self.header(AUTHORIZATION, format!("Bearer {}", token))
    }

    /// case-insensitive header lookup
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub const AUTHORIZATION: &str = "Authorization";

/// point-to-point channel to one node
#[async_trait]
pub trait Transport: Send + Sync {
    /// send a request, returning the body of a 2xx response
    async fn send(&self, request: Request) -> Result<Vec<u8>>;
}
