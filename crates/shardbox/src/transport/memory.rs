//! memory transport - an in-process storage node
//!
//! speaks the same json api as a real node (`/public_key`, `/storage/{key}`)
//! and keeps blobs in a map. faults can be injected per offset so quorum
//! handling can be exercised without a network.
//! NOT for production: nothing is persisted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::crypto::{Crypto, KeyPair, X25519Crypto};
use crate::node::{PublicKeyResponse, StorageData};
use crate::transport::{Method, Request, Transport, AUTHORIZATION};
use crate::{Error, Result};

/// injected failure for one storage offset
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// respond with this http status
    Status(u16),
    /// connection gives up
    Timeout,
    /// answer normally, but only after a delay
    Delay(Duration),
}

#[derive(Default)]
struct State {
    blobs: HashMap<String, Vec<u8>>,
    faults: HashMap<usize, Fault>,
    offline: bool,
    requests: HashMap<Method, usize>,
    public_key_requests: usize,
}

/// in-memory node
pub struct MemoryTransport {
    key_pair: KeyPair,
    state: Mutex<State>,
}

impl MemoryTransport {
    /// node with a fresh x25519 key pair
    pub fn new() -> Result<Self> {
        Ok(Self::with_key_pair(X25519Crypto.key_pair(None)?))
    }

    pub fn with_key_pair(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            state: Mutex::new(State::default()),
        }
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// make every storage request for `offset` fail
    pub fn inject(&self, offset: usize, fault: Fault) {
        self.lock().faults.insert(offset, fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// refuse every request, public key included
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// flip a bit in a stored blob, returns false if the key is absent
    pub fn corrupt(&self, key: &str) -> bool {
        match self.lock().blobs.get_mut(key) {
            Some(blob) if !blob.is_empty() => {
                let last = blob.len() - 1;
                blob[last] ^= 0x01;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().blobs.remove(key)
    }

    pub fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().blobs.get(key).cloned()
    }

    pub fn stored_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().blobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// number of requests seen with `method`, faulted ones included
    pub fn requests(&self, method: Method) -> usize {
        self.lock().requests.get(&method).copied().unwrap_or(0)
    }

    pub fn public_key_requests(&self) -> usize {
        self.lock().public_key_requests
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn storage(&self, request: &Request, key: &str) -> Result<Vec<u8>> {
        let authorized = request
            .header_value(AUTHORIZATION)
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| !token.trim().is_empty())
            .unwrap_or(false);
        if !authorized {
            return Err(Error::Http { status: 401 });
        }

        let mut state = self.lock();
        match request.method {
            Method::Post => {
                let body = request.body.as_deref().ok_or(Error::Http { status: 400 })?;
                let payload: StorageData =
                    serde_json::from_slice(body).map_err(|_| Error::Http { status: 400 })?;
                state.blobs.insert(key.to_string(), payload.data);
                serde_json::to_vec("ok").map_err(|e| Error::InvalidResponse(e.to_string()))
            }
            Method::Head => match state.blobs.contains_key(key) {
                true => Ok(Vec::new()),
                false => Err(Error::Http { status: 404 }),
            },
            Method::Get => {
                let data = state.blobs.get(key).cloned().ok_or(Error::Http { status: 404 })?;
                serde_json::to_vec(&StorageData { data })
                    .map_err(|e| Error::InvalidResponse(e.to_string()))
            }
        }
    }
}

/// offset suffix of a `{id}-{offset}` storage key
fn key_offset(key: &str) -> Option<usize> {
    key.rsplit_once('-').and_then(|(_, offset)| offset.parse().ok())
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: Request) -> Result<Vec<u8>> {
        let fault = {
            let mut state = self.lock();
            *state.requests.entry(request.method).or_insert(0) += 1;
            if state.offline {
                return Err(Error::Network("connection refused".into()));
            }
            request
                .path
                .strip_prefix("/storage/")
                .and_then(key_offset)
                .and_then(|offset| state.faults.get(&offset).cloned())
        };

        match fault {
            Some(Fault::Status(status)) => return Err(Error::Http { status }),
            Some(Fault::Timeout) => return Err(Error::Network("operation timed out".into())),
            Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        match (request.method, request.path.as_str()) {
            (Method::Get, "/public_key") => {
                self.lock().public_key_requests += 1;
                serde_json::to_vec(&PublicKeyResponse {
                    public_key: self.key_pair.public_key.clone(),
                })
                .map_err(|e| Error::InvalidResponse(e.to_string()))
            }
            (_, path) => match path.strip_prefix("/storage/") {
                Some(key) if !key.is_empty() => self.storage(&request, key),
                _ => Err(Error::Http { status: 404 }),
            },
        }
    }
}
