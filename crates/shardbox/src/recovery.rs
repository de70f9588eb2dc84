//! recovery orchestrator
//!
//! setup:
//! 1. split the secret into one group per node, `group_members` shares each
//! 2. per node, in parallel: derive the session key, encrypt, store
//!
//! check: probe every offset on every node, count groups whose present
//! members reach the member threshold.
//!
//! recover:
//! 1. per node, in parallel: fetch every offset and decrypt it
//! 2. a node whose decrypted shares fall below the member threshold drops out
//! 3. if enough groups survive, join them back into the secret

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine;
use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{Configuration, ShareConfiguration};
use crate::crypto::{Crypto, KeyPair, SessionKey, X25519Crypto};
use crate::error::collect_failures;
use crate::node::StorageNode;
use crate::shard::GroupShard;
use crate::sharing::{GroupSpec, SecretSharing, ThresholdSharing};
use crate::{Error, Result};

/// splits, distributes, checks and recovers secrets across storage nodes
pub struct Shardbox<C = X25519Crypto, S = ThresholdSharing> {
    nodes: Vec<StorageNode>,
    config: ShareConfiguration,
    crypto: C,
    sharing: S,
    /// created on first use, reused for the orchestrator's lifetime
    key_pair: Mutex<Option<Arc<KeyPair>>>,
    /// one cell per node id, first successful derivation wins
    session_keys: Mutex<HashMap<String, Arc<OnceCell<SessionKey>>>>,
}

/// per-node probe results of [`Shardbox::availability`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Availability {
    /// `groups[node][offset]` is true when the share is present
    pub groups: Vec<Vec<bool>>,
    group_threshold: usize,
    group_member_threshold: usize,
}

impl Availability {
    /// present shares per node
    pub fn present_members(&self) -> Vec<usize> {
        self.groups
            .iter()
            .map(|members| members.iter().filter(|&&present| present).count())
            .collect()
    }

    pub fn group_met(&self, index: usize) -> bool {
        self.present_members()
            .get(index)
            .map(|&present| present >= self.group_member_threshold)
            .unwrap_or(false)
    }

    pub fn met_groups(&self) -> usize {
        self.present_members()
            .into_iter()
            .filter(|&present| present >= self.group_member_threshold)
            .count()
    }

    pub fn is_recoverable(&self) -> bool {
        self.met_groups() >= self.group_threshold
    }
}

/// a node failure that recovery tolerated
#[derive(Debug)]
pub struct Degraded {
    pub node: String,
    pub error: Error,
}

/// outcome of [`Shardbox::recover_detailed`]
pub struct Recovered {
    pub secret: Vec<u8>,
    /// failures below quorum tolerance, in node order
    pub degraded: Vec<Degraded>,
}

impl std::fmt::Debug for Recovered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recovered")
            .field("secret_len", &self.secret.len())
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// split a record set belongs to: identifier, group threshold, group count
type SplitKey = (u16, u8, u8);

/// one node's decrypted records plus any member losses it tolerated
struct GroupParts {
    records: Vec<Vec<u8>>,
    split: SplitKey,
    lost: Option<Error>,
}

/// most common split among usable nodes, earliest node wins ties
fn consistent_split(outcomes: &[Result<GroupParts>]) -> Option<(SplitKey, usize)> {
    let mut counts: Vec<(SplitKey, usize)> = Vec::new();
    for group in outcomes.iter().flatten() {
        match counts.iter_mut().find(|(split, _)| *split == group.split) {
            Some((_, n)) => *n += 1,
            None => counts.push((group.split, 1)),
        }
    }

    counts.into_iter().fold(None, |best, (split, n)| match best {
        Some((_, m)) if m >= n => best,
        _ => Some((split, n)),
    })
}

/// decode a node's records, which must all belong to one group of one split
fn group_parts(records: Vec<Vec<u8>>, lost: Option<Error>) -> Result<GroupParts> {
    let group = GroupShard::deserialize(&records)?;
    Ok(GroupParts {
        records,
        split: (group.identifier, group.group_threshold, group.group_count),
        lost,
    })
}

impl Shardbox {
    /// orchestrator with the default x25519 channel and gf256 sharing
    pub fn new(nodes: Vec<StorageNode>, configuration: &Configuration) -> Result<Self> {
        Self::with_components(nodes, configuration, X25519Crypto, ThresholdSharing::default())
    }

    /// orchestrator over http nodes, each identified by its url
    #[cfg(feature = "network")]
    pub fn connect(urls: &[&str], configuration: &Configuration) -> Result<Self> {
        let nodes = urls
            .iter()
            .map(|url| StorageNode::http(url))
            .collect::<Result<Vec<_>>>()?;
        Self::new(nodes, configuration)
    }
}

impl<C: Crypto, S: SecretSharing> Shardbox<C, S> {
    pub fn with_components(
        nodes: Vec<StorageNode>,
        configuration: &Configuration,
        crypto: C,
        sharing: S,
    ) -> Result<Self> {
        let config = configuration.resolve(nodes.len())?;

        for (i, node) in nodes.iter().enumerate() {
            if nodes[..i].iter().any(|other| other.id() == node.id()) {
                return Err(Error::InvalidConfiguration(format!(
                    "duplicate node id {}",
                    node.id()
                )));
            }
        }

        Ok(Self {
            nodes,
            config,
            crypto,
            sharing,
            key_pair: Mutex::new(None),
            session_keys: Mutex::new(HashMap::new()),
        })
    }

    pub fn configuration(&self) -> ShareConfiguration {
        self.config
    }

    pub fn nodes(&self) -> &[StorageNode] {
        &self.nodes
    }

    /// public key of this orchestrator
    pub fn public_key(&self) -> Result<Vec<u8>> {
        Ok(self.key_pair()?.public_key.clone())
    }

    /// base64 public key, passed to the identity provider so issued tokens
    /// are bound to this orchestrator
    pub fn nonce(&self) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.public_key()?))
    }

    /// split `secret` and store every node's shares under `id`
    ///
    /// fails if any node fails; the error names every failed node.
    pub async fn setup_recovery(&self, secret: &[u8], id: &str, token: &str) -> Result<()> {
        let parts = self.split_secret(secret)?;
        info!(id, nodes = self.nodes.len(), "distributing shares");

        let results = join_all(self.nodes.iter().zip(parts).map(|(node, records)| async move {
            let encrypted = self.encrypt_parts(&records, node).await?;
            node.store_shares(&encrypted, id, token).await
        }))
        .await;

        if results.iter().all(Result::is_ok) {
            info!(id, "shares distributed");
            return Ok(());
        }

        let (offsets, causes) = collect_failures(results);
        let nodes = self.node_ids(&offsets);
        warn!(id, failed = ?nodes, "share distribution failed");
        Err(Error::Nodes { nodes, causes })
    }

    /// probe every share on every node
    pub async fn availability(&self, id: &str, token: &str) -> Availability {
        let members = self.config.group_members();
        let groups = join_all(
            self.nodes
                .iter()
                .map(|node| node.check_shares(members, id, token)),
        )
        .await;

        Availability {
            groups,
            group_threshold: self.config.group_threshold(),
            group_member_threshold: self.config.group_member_threshold(),
        }
    }

    /// true when enough shares are present to meet both thresholds
    pub async fn check_recovery(&self, id: &str, token: &str) -> bool {
        let availability = self.availability(id, token).await;
        debug!(
            id,
            met = availability.met_groups(),
            need = self.config.group_threshold(),
            "checked recovery"
        );
        availability.is_recoverable()
    }

    /// fetch, decrypt and join the secret stored under `id`
    pub async fn recover(&self, id: &str, token: &str) -> Result<Vec<u8>> {
        self.recover_detailed(id, token).await.map(|r| r.secret)
    }

    /// like [`recover`](Self::recover), also reporting tolerated failures
    pub async fn recover_detailed(&self, id: &str, token: &str) -> Result<Recovered> {
        let outcomes = join_all(
            self.nodes
                .iter()
                .map(|node| self.retrieve_group(node, id, token)),
        )
        .await;

        let usable = outcomes.iter().filter(|o| o.is_ok()).count();
        if usable < self.config.group_threshold() {
            let (offsets, causes) = collect_failures(outcomes);
            let nodes = self.node_ids(&offsets);
            warn!(id, usable, need = self.config.group_threshold(), failed = ?nodes, "group threshold not met");
            return Err(Error::GroupThresholdNotMet { nodes, causes });
        }

        // nodes holding records of another split (e.g. a half-finished
        // re-setup) drop out like failed nodes
        let split = consistent_split(&outcomes).map(|(split, _)| split);
        let need = split
            .map(|(_, threshold, _)| threshold as usize)
            .unwrap_or_else(|| self.config.group_threshold());

        let mut parts = Vec::with_capacity(usable);
        let mut entries: Vec<(bool, Degraded)> = Vec::new();
        for (node, outcome) in self.nodes.iter().zip(outcomes) {
            let node = node.id().to_string();
            match outcome {
                Ok(group) if Some(group.split) == split => {
                    if let Some(error) = group.lost {
                        entries.push((false, Degraded { node, error }));
                    }
                    parts.push(group.records);
                }
                Ok(_) => entries.push((true, Degraded { node, error: Error::GroupShardsMismatch })),
                Err(error) => entries.push((true, Degraded { node, error })),
            }
        }

        if parts.len() < need {
            let (nodes, causes): (Vec<_>, Vec<_>) = entries
                .into_iter()
                .filter(|(failed, _)| *failed)
                .map(|(_, d)| (d.node, d.error))
                .unzip();
            warn!(id, usable = parts.len(), need, failed = ?nodes, "no consistent group quorum");
            return Err(Error::GroupThresholdNotMet { nodes, causes });
        }

        let degraded: Vec<Degraded> = entries
            .into_iter()
            .map(|(failed, d)| {
                if failed {
                    warn!(node = %d.node, error = %d.error, "tolerating failed node");
                } else {
                    warn!(node = %d.node, error = %d.error, "tolerating lost shares");
                }
                d
            })
            .collect();

        let secret = self.sharing.join(&parts)?;
        info!(id, groups = parts.len(), degraded = degraded.len(), "secret recovered");
        Ok(Recovered { secret, degraded })
    }

    fn key_pair(&self) -> Result<Arc<KeyPair>> {
        let mut slot = self.key_pair.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(key_pair) = slot.as_ref() {
            return Ok(key_pair.clone());
        }

        let key_pair = Arc::new(self.crypto.key_pair(None)?);
        *slot = Some(key_pair.clone());
        debug!("generated orchestrator key pair");
        Ok(key_pair)
    }

    async fn session_key(&self, node: &StorageNode) -> Result<SessionKey> {
        let cell = {
            let mut keys = self.session_keys.lock().unwrap_or_else(|e| e.into_inner());
            keys.entry(node.id().to_string()).or_default().clone()
        };

        let key = cell
            .get_or_try_init(|| async {
                let public_key = node.fetch_public_key().await?;
                let key_pair = self.key_pair()?;
                let key = self.crypto.session_key(&key_pair.private_key, &public_key)?;
                debug!(node = %node.id(), "derived session key");
                Ok::<_, Error>(key)
            })
            .await?;

        Ok(key.clone())
    }

    fn split_secret(&self, secret: &[u8]) -> Result<Vec<Vec<Vec<u8>>>> {
        let groups = vec![
            GroupSpec::new(self.config.group_members(), self.config.group_member_threshold());
            self.config.groups()
        ];
        self.sharing.split(secret, &groups, self.config.group_threshold())
    }

    async fn encrypt_parts(&self, records: &[Vec<u8>], node: &StorageNode) -> Result<Vec<Vec<u8>>> {
        let key = self.session_key(node).await?;
        records
            .iter()
            .map(|record| self.crypto.encrypt(record, &key))
            .collect()
    }

    async fn retrieve_group(&self, node: &StorageNode, id: &str, token: &str) -> Result<GroupParts> {
        let encrypted = node
            .retrieve_share_results(self.config.group_members(), id, token)
            .await;
        let key = self.session_key(node).await?;

        let decrypted: Vec<Result<Vec<u8>>> = encrypted
            .into_iter()
            .map(|share| share.and_then(|c| self.crypto.decrypt(&c, &key)))
            .collect();

        let present = decrypted.iter().filter(|r| r.is_ok()).count();
        let need = self.config.group_member_threshold();
        if decrypted.iter().all(Result::is_ok) {
            let records: Vec<Vec<u8>> = decrypted.into_iter().flatten().collect();
            return group_parts(records, None);
        }

        if present < need {
            let (offsets, causes) = collect_failures(decrypted);
            debug!(node = %node.id(), present, need, "member threshold not met");
            return Err(Error::MemberThresholdNotMet { offsets, causes });
        }

        let mut records = Vec::with_capacity(present);
        let mut failures = Vec::new();
        for result in decrypted {
            match result {
                Ok(record) => {
                    records.push(record);
                    failures.push(Ok(()));
                }
                Err(e) => failures.push(Err(e)),
            }
        }
        let (offsets, causes) = collect_failures(failures);
        group_parts(records, Some(Error::NodeFailure { offsets, causes }))
    }

    fn node_ids(&self, offsets: &[usize]) -> Vec<String> {
        offsets
            .iter()
            .map(|&i| self.nodes[i].id().to_string())
            .collect()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;

    fn cluster(n: usize) -> (Vec<Arc<MemoryTransport>>, Vec<StorageNode>) {
        let transports: Vec<_> = (0..n)
            .map(|_| Arc::new(MemoryTransport::new().unwrap()))
            .collect();
        let nodes = transports
            .iter()
            .enumerate()
            .map(|(i, t)| StorageNode::new(format!("mem://node{}", i), t.clone()))
            .collect();
        (transports, nodes)
    }

    #[test]
    fn test_key_pair_created_once() {
        let (_, nodes) = cluster(3);
        let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();
        let nonce = sb.nonce().unwrap();
        assert_eq!(nonce, sb.nonce().unwrap());
        assert_eq!(sb.public_key().unwrap().len(), 32);
    }

    #[test]
    fn test_duplicate_node_ids_rejected() {
        let t = Arc::new(MemoryTransport::new().unwrap());
        let nodes = vec![
            StorageNode::new("same", t.clone()),
            StorageNode::new("same", t),
        ];
        assert!(matches!(
            Shardbox::new(nodes, &Configuration::new()),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_session_key_fetched_once_per_node() {
        let (transports, nodes) = cluster(2);
        let sb = Shardbox::new(nodes, &Configuration::new().with_group_threshold(1)).unwrap();

        sb.setup_recovery(b"first", "a", "tok").await.unwrap();
        sb.setup_recovery(b"second", "b", "tok").await.unwrap();
        sb.recover("a", "tok").await.unwrap();

        for t in &transports {
            assert_eq!(t.public_key_requests(), 1);
        }
    }

    #[tokio::test]
    async fn test_node_can_decrypt_its_own_shares() {
        let (transports, nodes) = cluster(1);
        let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();
        sb.setup_recovery(b"visible to node", "n", "tok").await.unwrap();

        // the node derives the same key from the orchestrator's public key
        let node_key = X25519Crypto
            .session_key(&transports[0].key_pair().private_key, &sb.public_key().unwrap())
            .unwrap();
        let blob = transports[0].blob("n-0").unwrap();
        let record = X25519Crypto.decrypt(&blob, &node_key).unwrap();
        assert_eq!(record.len(), 5 + b"visible to node".len());
    }

    #[tokio::test]
    async fn test_failed_session_key_is_retried() {
        let (transports, nodes) = cluster(1);
        let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();

        transports[0].set_offline(true);
        assert!(sb.setup_recovery(b"s", "x", "tok").await.is_err());

        transports[0].set_offline(false);
        sb.setup_recovery(b"s", "x", "tok").await.unwrap();
        assert_eq!(sb.recover("x", "tok").await.unwrap(), b"s".to_vec());
    }

    fn parts(split: SplitKey) -> Result<GroupParts> {
        Ok(GroupParts { records: Vec::new(), split, lost: None })
    }

    #[test]
    fn test_consistent_split() {
        assert_eq!(consistent_split(&[]), None);

        let outcomes = vec![parts((1, 2, 3)), Err(Error::GroupShardsMismatch), parts((9, 2, 3))];
        assert_eq!(consistent_split(&outcomes), Some(((1, 2, 3), 1)));

        let outcomes = vec![parts((1, 2, 3)), parts((9, 2, 3)), parts((9, 2, 3))];
        assert_eq!(consistent_split(&outcomes), Some(((9, 2, 3), 2)));
    }

    #[test]
    fn test_availability_counts() {
        let availability = Availability {
            groups: vec![vec![true, true], vec![true, false], vec![false, false]],
            group_threshold: 2,
            group_member_threshold: 2,
        };
        assert_eq!(availability.present_members(), vec![2, 1, 0]);
        assert!(availability.group_met(0));
        assert!(!availability.group_met(1));
        assert!(!availability.group_met(7));
        assert_eq!(availability.met_groups(), 1);
        assert!(!availability.is_recoverable());
    }
}
