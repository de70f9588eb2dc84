//! storage node client
//!
//! a node stores opaque (already encrypted) blobs under `{id}-{offset}`.
//! store and retrieve fan out one request per offset and are all-or-nothing;
//! check is best-effort and only ever answers yes/no per offset.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::collect_failures;
use crate::transport::{Request, Transport};
use crate::{Error, Result};

/// `GET /public_key`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
}

/// body of `POST /storage/{key}` and response of `GET /storage/{key}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageData {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// storage key of one share
pub fn storage_key(id: &str, offset: usize) -> String {
    format!("{}-{}", id, offset)
}

/// handle to one remote node
#[derive(Clone)]
pub struct StorageNode {
    id: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNode").field("id", &self.id).finish()
    }
}

impl StorageNode {
    pub fn new(id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            transport,
        }
    }

    /// node behind an http endpoint, identified by its url
    #[cfg(feature = "network")]
    pub fn http(url: &str) -> Result<Self> {
        let transport = crate::transport::http::HttpTransport::new(url)?;
        Ok(Self::new(url, Arc::new(transport)))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn fetch_public_key(&self) -> Result<Vec<u8>> {
        let body = self.transport.send(Request::get("/public_key")).await?;
        let resp: PublicKeyResponse = decode(&body)?;
        Ok(resp.public_key)
    }

    /// store `shares[i]` at offset `i`; fails if any offset fails
    pub async fn store_shares(&self, shares: &[Vec<u8>], id: &str, token: &str) -> Result<()> {
        let results = join_all(
            shares
                .iter()
                .enumerate()
                .map(|(offset, share)| self.store_share(share, id, offset, token)),
        )
        .await;

        all_or_nothing(results).map(|_| ())
    }

    async fn store_share(&self, share: &[u8], id: &str, offset: usize, token: &str) -> Result<()> {
        let body = serde_json::to_vec(&StorageData { data: share.to_vec() })
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        let req = Request::post(format!("/storage/{}", storage_key(id, offset)), body)
            .authorization(token);

        // ack body is opaque
        self.transport.send(req).await?;
        debug!(node = %self.id, offset, "stored share");
        Ok(())
    }

    /// existence probe per offset; errors read as absent
    pub async fn check_shares(&self, count: usize, id: &str, token: &str) -> Vec<bool> {
        join_all((0..count).map(|offset| async move {
            let req = Request::head(format!("/storage/{}", storage_key(id, offset)))
                .authorization(token);
            self.transport.send(req).await.is_ok()
        }))
        .await
    }

    /// fetch offsets `0..count`; fails if any offset fails
    pub async fn retrieve_shares(&self, count: usize, id: &str, token: &str) -> Result<Vec<Vec<u8>>> {
        all_or_nothing(self.retrieve_share_results(count, id, token).await)
    }

    /// fetch offsets `0..count`, keeping each offset's outcome
    pub async fn retrieve_share_results(&self, count: usize, id: &str, token: &str) -> Vec<Result<Vec<u8>>> {
        join_all((0..count).map(|offset| self.retrieve_share(id, offset, token))).await
    }

    async fn retrieve_share(&self, id: &str, offset: usize, token: &str) -> Result<Vec<u8>> {
        let req = Request::get(format!("/storage/{}", storage_key(id, offset))).authorization(token);
        let body = self.transport.send(req).await?;
        let resp: StorageData = decode(&body)?;
        Ok(resp.data)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::InvalidResponse(e.to_string()))
}

/// every offset succeeded, or one error naming the failed offsets
fn all_or_nothing<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    if results.iter().all(Result::is_ok) {
        return results.into_iter().collect();
    }
    let (offsets, causes) = collect_failures(results);
    Err(Error::NodeFailure { offsets, causes })
}

/// base64 serialization helper for serde
mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}
