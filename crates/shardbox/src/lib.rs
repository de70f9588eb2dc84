//! # shardbox
//!
//! threshold secret recovery across independent storage nodes.
//!
//! a secret is split twice: once into one group per node, then each group
//! into member shares. every node only ever sees its own members, encrypted
//! under a key shared between the orchestrator and that node.
//!
//! ## architecture
//!
//! ```text
//!          ┌──────────┐
//!          │  secret  │
//!          └────┬─────┘
//!               │ split (group threshold 2-of-3)
//!       ┌───────┼───────┐
//!       ▼       ▼       ▼
//!    group 0 group 1 group 2
//!       │       │       │   split (member threshold 2-of-2)
//!     ┌─┴─┐   ┌─┴─┐   ┌─┴─┐
//!     m0 m1   m0 m1   m0 m1
//!       │       │       │   x25519 + chacha20poly1305
//!       ▼       ▼       ▼
//!    ┌─────┐ ┌─────┐ ┌─────┐
//!    │node │ │node │ │node │  {id}-{offset}
//!    │  0  │ │  1  │ │  2  │
//!    └─────┘ └─────┘ └─────┘
//! ```
//!
//! ## properties
//!
//! - fewer than group-threshold nodes learn nothing about the secret
//! - recovery tolerates any node set below quorum loss
//! - each share record carries its own coordinates, any qualifying subset joins
//!
//! ## usage
//!
//! ```rust,ignore
//! use shardbox::{Configuration, Shardbox};
//!
//! let sb = Shardbox::connect(&["https://a.example", "https://b.example", "https://c.example"],
//!     &Configuration::new())?;
//!
//! // bind the identity token to this orchestrator
//! let nonce = sb.nonce()?;
//! let token = identity_provider_login(&nonce).await?;
//!
//! sb.setup_recovery(&secret, "alice", &token).await?;
//! assert!(sb.check_recovery("alice", &token).await);
//! let recovered = sb.recover("alice", &token).await?;
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod node;
pub mod recovery;
pub mod shamir;
pub mod shard;
pub mod sharing;
pub mod transport;

pub use config::{Configuration, ShareConfiguration};
pub use crypto::{Crypto, KeyPair, SessionKey, X25519Crypto};
pub use error::{Error, Result};
pub use node::StorageNode;
pub use recovery::{Availability, Degraded, Recovered, Shardbox};
pub use shamir::{Gf256Shamir, Shamir};
pub use shard::{GroupShard, MemberShard};
pub use sharing::{GroupSpec, SecretSharing, ThresholdSharing};
pub use transport::{Method, Request, Transport};

#[cfg(feature = "memory")]
pub use transport::memory::{Fault, MemoryTransport};

#[cfg(feature = "network")]
pub use transport::http::HttpTransport;
