//! error types for shardbox

use thiserror::Error;

use crate::shamir::ShamirError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // === configuration errors ===
    #[error("group threshold {threshold} exceeds group count {groups}")]
    GroupThresholdExceeded { threshold: usize, groups: usize },

    #[error("member threshold {threshold} exceeds member count {members}")]
    MemberThresholdExceeded { threshold: usize, members: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    // === splitting errors ===
    #[error("invalid secret size {0} (max 255 bytes)")]
    InvalidSecretSize(usize),

    #[error("unsupported group count {0} (must be 1..=16)")]
    UnsupportedGroupSize(usize),

    #[error("unsupported member count {0} (must be 1..=16)")]
    UnsupportedMemberSize(usize),

    #[error("invalid group threshold")]
    InvalidGroupThreshold,

    #[error("invalid member threshold")]
    InvalidMemberThreshold,

    #[error("shamir: {0}")]
    Shamir(#[from] ShamirError),

    // === codec errors ===
    #[error("invalid shard format")]
    InvalidShardFormat,

    #[error("reserved bits set in shard")]
    InvalidReservedBit,

    #[error("shards belong to different groups or splits")]
    GroupShardsMismatch,

    #[error("empty shard set")]
    EmptyShardSet,

    #[error("duplicate member index {0}")]
    DuplicateMemberIndex(u8),

    #[error("duplicate group index {0}")]
    DuplicateGroupIndex(u8),

    #[error("not enough members: have {have}, need {need}")]
    NotEnoughMembers { have: usize, need: usize },

    #[error("not enough groups: have {have}, need {need}")]
    NotEnoughGroups { have: usize, need: usize },

    // === crypto errors ===
    #[error("invalid private key length {0}")]
    InvalidPrivateKey(usize),

    #[error("invalid public key length {0}")]
    InvalidPublicKey(usize),

    #[error("invalid session key length {0}")]
    InvalidSessionKey(usize),

    #[error("invalid ciphertext length {0}")]
    InvalidCiphertext(usize),

    #[error("session key not generated")]
    SessionKeyNotGenerated,

    #[error("key derivation failed")]
    KeyDerivationFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    // === transport errors ===
    #[error("http status {status}")]
    Http { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    // === aggregate errors ===
    #[error("node failed at offsets {offsets:?}: {}", describe(.causes))]
    NodeFailure { offsets: Vec<usize>, causes: Vec<Error> },

    #[error("nodes {nodes:?} failed: {}", describe(.causes))]
    Nodes { nodes: Vec<String>, causes: Vec<Error> },

    // === quorum errors ===
    #[error("member threshold not met, failed offsets {offsets:?}: {}", describe(.causes))]
    MemberThresholdNotMet { offsets: Vec<usize>, causes: Vec<Error> },

    #[error("group threshold not met, failed nodes {nodes:?}: {}", describe(.causes))]
    GroupThresholdNotMet { nodes: Vec<String>, causes: Vec<Error> },
}

impl Error {
    /// true for errors raised by threshold evaluation rather than a single call
    pub fn is_quorum(&self) -> bool {
        matches!(
            self,
            Error::MemberThresholdNotMet { .. } | Error::GroupThresholdNotMet { .. }
        )
    }
}

fn describe(causes: &[Error]) -> String {
    causes
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// split indexed results into the failing positions and their errors
pub(crate) fn collect_failures<T>(results: Vec<Result<T>>) -> (Vec<usize>, Vec<Error>) {
    results
        .into_iter()
        .enumerate()
        .filter_map(|(offset, result)| result.err().map(|e| (offset, e)))
        .unzip()
}
