//! shardbox-node - keeps encrypted shares for recovery
//!
//! stores opaque blobs under `{id}-{offset}` and publishes the node's x25519
//! public key. shares arrive encrypted under a key only the owning
//! orchestrator and this node can derive; the node never handles plaintext
//! secrets.
//!
//! routes:
//!   GET  /                           node info
//!   GET  /health
//!   GET  /api/v1/public_key
//!   POST /api/v1/storage/{key}       store `{"data": base64}`
//!   HEAD /api/v1/storage/{key}       200 or 404
//!   GET  /api/v1/storage/{key}       `{"data": base64}`
//!
//! storage routes need a bearer token. verifying it against the identity
//! provider is left to a fronting proxy.

use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use shardbox::crypto::{random_bytes, Crypto, KeyPair, X25519Crypto};
use shardbox::node::{PublicKeyResponse, StorageData};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// mount point of the storage api
pub const API_PREFIX: &str = "/api/v1";

/// length of the persisted key seed
pub const SEED_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("key error: {0}")]
    Key(#[from] shardbox::Error),

    #[error("invalid node key file: expected 32 bytes, got {0}")]
    InvalidKeyFile(usize),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("metrics exporter: {0}")]
    Metrics(String),
}

/// state shared across handlers
pub struct AppState {
    db: sled::Db,
    key_pair: KeyPair,
}

impl AppState {
    pub fn new(db: sled::Db, key_pair: KeyPair) -> Self {
        gauge!("node_shares_current").set(db.len() as f64);
        Self { db, key_pair }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.key_pair.public_key
    }

    /// number of stored shares
    pub fn shares(&self) -> usize {
        self.db.len()
    }

    /// stored blob, if any
    pub fn blob(&self, key: &str) -> Result<Option<Vec<u8>>, NodeError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    pub fn remove(&self, key: &str) -> Result<bool, NodeError> {
        let removed = self.db.remove(key)?.is_some();
        gauge!("node_shares_current").set(self.db.len() as f64);
        Ok(removed)
    }
}

/// load the node key from its seed file, creating one on first start
pub fn load_or_create_key(path: &FsPath) -> Result<KeyPair, NodeError> {
    let seed = if path.exists() {
        let seed = Zeroizing::new(std::fs::read(path)?);
        if seed.len() != SEED_LEN {
            return Err(NodeError::InvalidKeyFile(seed.len()));
        }
        seed
    } else {
        let seed = Zeroizing::new(random_bytes::<SEED_LEN>().to_vec());
        std::fs::write(path, seed.as_slice())?;
        info!("generated node key at {}", path.display());
        seed
    };

    Ok(X25519Crypto.key_pair(Some(seed.as_slice()))?)
}

type ApiError = (StatusCode, String);

fn internal(endpoint: &'static str, e: impl std::fmt::Display) -> ApiError {
    counter!("node_errors_total", "endpoint" => endpoint, "error" => "internal").increment(1);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn not_found(endpoint: &'static str) -> ApiError {
    counter!("node_errors_total", "endpoint" => endpoint, "error" => "not_found").increment(1);
    (StatusCode::NOT_FOUND, "not found".into())
}

/// token presence only, the token itself is opaque here
fn authorize(headers: &HeaderMap, endpoint: &'static str) -> Result<(), ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");

    if token.is_empty() {
        counter!("node_errors_total", "endpoint" => endpoint, "error" => "unauthorized").increment(1);
        return Err((StatusCode::UNAUTHORIZED, "missing bearer token".into()));
    }
    Ok(())
}

#[derive(Serialize)]
struct NodeInfoResponse {
    version: String,
    pubkey: String,
    shares: u64,
}

// === handlers ===

async fn node_info(State(state): State<Arc<AppState>>) -> Json<NodeInfoResponse> {
    Json(NodeInfoResponse {
        version: env!("CARGO_PKG_VERSION").into(),
        pubkey: hex::encode(state.public_key()),
        shares: state.shares() as u64,
    })
}

async fn health() -> &'static str {
    "ok"
}

async fn public_key(State(state): State<Arc<AppState>>) -> Json<PublicKeyResponse> {
    counter!("node_requests_total", "endpoint" => "public_key").increment(1);
    Json(PublicKeyResponse {
        public_key: state.public_key().to_vec(),
    })
}

async fn store(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StorageData>,
) -> Result<Json<&'static str>, ApiError> {
    let start = Instant::now();
    counter!("node_requests_total", "endpoint" => "store").increment(1);
    authorize(&headers, "store")?;

    let replaced = state
        .db
        .insert(key.as_bytes(), body.data)
        .map_err(|e| internal("store", e))?
        .is_some();
    state.db.flush_async().await.map_err(|e| internal("store", e))?;

    if replaced {
        warn!(key = %key, "overwrote existing share");
    }
    debug!(key = %key, "stored share");

    gauge!("node_shares_current").set(state.db.len() as f64);
    histogram!("node_request_duration_seconds", "endpoint" => "store").record(start.elapsed().as_secs_f64());

    Ok(Json("ok"))
}

async fn check(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    counter!("node_requests_total", "endpoint" => "check").increment(1);
    authorize(&headers, "check")?;

    match state.db.contains_key(key.as_bytes()) {
        Ok(true) => Ok(StatusCode::OK),
        Ok(false) => Err(not_found("check")),
        Err(e) => Err(internal("check", e)),
    }
}

async fn retrieve(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StorageData>, ApiError> {
    let start = Instant::now();
    counter!("node_requests_total", "endpoint" => "retrieve").increment(1);
    authorize(&headers, "retrieve")?;

    let data = state
        .db
        .get(key.as_bytes())
        .map_err(|e| internal("retrieve", e))?
        .ok_or_else(|| not_found("retrieve"))?;

    debug!(key = %key, "served share");
    histogram!("node_request_duration_seconds", "endpoint" => "retrieve").record(start.elapsed().as_secs_f64());

    Ok(Json(StorageData { data: data.to_vec() }))
}

/// full node router, api mounted under [`API_PREFIX`]
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/public_key", get(public_key))
        .route("/storage/{key}", get(retrieve).head(check).post(store));

    Router::new()
        .route("/", get(node_info))
        .route("/health", get(health))
        .nest(API_PREFIX, api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
