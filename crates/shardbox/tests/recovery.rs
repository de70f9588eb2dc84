//! end-to-end recovery against in-memory nodes
//!
//! every node is a MemoryTransport, faults are injected per storage offset

use std::sync::Arc;

use shardbox::{Configuration, Error, Fault, MemoryTransport, Method, Shardbox, StorageNode};

const TOKEN: &str = "id-token";

fn cluster(n: usize) -> (Vec<Arc<MemoryTransport>>, Vec<StorageNode>) {
    let transports: Vec<_> = (0..n)
        .map(|_| Arc::new(MemoryTransport::new().unwrap()))
        .collect();
    let nodes = transports
        .iter()
        .enumerate()
        .map(|(i, t)| StorageNode::new(format!("node{}", i), t.clone()))
        .collect();
    (transports, nodes)
}

/// 3 nodes, 3 members each, 2-of-3 at both levels
fn three_by_three(member_threshold: usize) -> (Vec<Arc<MemoryTransport>>, Shardbox) {
    let (transports, nodes) = cluster(3);
    let config = Configuration::new()
        .with_group_threshold(2)
        .with_group_members(3)
        .with_group_member_threshold(member_threshold);
    (transports, Shardbox::new(nodes, &config).unwrap())
}

#[tokio::test]
async fn test_setup_check_recover() {
    let (transports, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();
    let secret = [0x42u8; 32];

    sb.setup_recovery(&secret, "alice", TOKEN).await.unwrap();
    for t in &transports {
        assert_eq!(t.stored_keys(), vec!["alice-0", "alice-1"]);
    }

    assert!(sb.check_recovery("alice", TOKEN).await);
    assert_eq!(sb.recover("alice", TOKEN).await.unwrap(), secret.to_vec());
}

#[tokio::test]
async fn test_stored_blobs_are_encrypted() {
    let (transports, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();
    let secret = b"correct horse battery staple".to_vec();

    sb.setup_recovery(&secret, "alice", TOKEN).await.unwrap();

    // header + share, plus nonce and tag
    let blob = transports[0].blob("alice-0").unwrap();
    assert_eq!(blob.len(), 12 + 5 + secret.len() + 16);
    assert!(!blob.windows(secret.len()).any(|w| w == secret.as_slice()));
}

#[tokio::test]
async fn test_public_keys_fetched_once() {
    let (transports, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();

    sb.setup_recovery(b"one", "a", TOKEN).await.unwrap();
    sb.setup_recovery(b"two", "b", TOKEN).await.unwrap();
    assert_eq!(sb.recover("a", TOKEN).await.unwrap(), b"one".to_vec());
    assert_eq!(sb.recover("b", TOKEN).await.unwrap(), b"two".to_vec());

    for t in &transports {
        assert_eq!(t.public_key_requests(), 1);
    }
}

#[tokio::test]
async fn test_timeout_within_member_tolerance() {
    let (transports, sb) = three_by_three(2);
    let secret = [7u8; 16];
    sb.setup_recovery(&secret, "alice", TOKEN).await.unwrap();

    transports[2].inject(1, Fault::Timeout);

    let availability = sb.availability("alice", TOKEN).await;
    assert_eq!(availability.groups[2], vec![true, false, true]);
    assert!(availability.group_met(2));
    assert_eq!(availability.met_groups(), 3);
    assert!(sb.check_recovery("alice", TOKEN).await);

    let recovered = sb.recover_detailed("alice", TOKEN).await.unwrap();
    assert_eq!(recovered.secret, secret.to_vec());
    assert_eq!(recovered.degraded.len(), 1);
    assert_eq!(recovered.degraded[0].node, "node2");
    match &recovered.degraded[0].error {
        Error::NodeFailure { offsets, causes } => {
            assert_eq!(offsets, &vec![1]);
            assert!(matches!(causes[0], Error::Network(_)));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_timeout_breaks_member_threshold() {
    let (transports, sb) = three_by_three(3);
    let secret = [9u8; 16];
    sb.setup_recovery(&secret, "alice", TOKEN).await.unwrap();

    transports[2].inject(1, Fault::Timeout);

    let availability = sb.availability("alice", TOKEN).await;
    assert!(!availability.group_met(2));
    assert_eq!(availability.met_groups(), 2);
    assert!(sb.check_recovery("alice", TOKEN).await);

    // node2 drops out, the other two groups still reach quorum
    let recovered = sb.recover_detailed("alice", TOKEN).await.unwrap();
    assert_eq!(recovered.secret, secret.to_vec());
    assert_eq!(recovered.degraded.len(), 1);
    assert_eq!(recovered.degraded[0].node, "node2");
    assert!(matches!(
        &recovered.degraded[0].error,
        Error::MemberThresholdNotMet { offsets, .. } if offsets == &vec![1]
    ));
}

#[tokio::test]
async fn test_group_threshold_not_met() {
    let (transports, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();
    sb.setup_recovery(b"secret", "alice", TOKEN).await.unwrap();

    transports[1].set_offline(true);
    transports[2].inject(0, Fault::Status(503));

    assert!(!sb.check_recovery("alice", TOKEN).await);

    let err = sb.recover("alice", TOKEN).await.unwrap_err();
    assert!(err.is_quorum());
    match err {
        Error::GroupThresholdNotMet { nodes, causes } => {
            assert_eq!(nodes, vec!["node1", "node2"]);
            assert!(matches!(
                &causes[0],
                Error::MemberThresholdNotMet { offsets, .. } if offsets == &vec![0, 1]
            ));
            assert!(matches!(
                &causes[1],
                Error::MemberThresholdNotMet { offsets, causes } if offsets == &vec![0]
                    && matches!(causes[0], Error::Http { status: 503 })
            ));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_corrupted_blob_fails_decryption() {
    let (transports, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();
    let secret = b"tamper evident".to_vec();
    sb.setup_recovery(&secret, "alice", TOKEN).await.unwrap();

    assert!(transports[0].corrupt("alice-1"));

    // presence probe cannot see tampering
    assert!(sb.check_recovery("alice", TOKEN).await);

    let recovered = sb.recover_detailed("alice", TOKEN).await.unwrap();
    assert_eq!(recovered.secret, secret);
    assert!(matches!(
        &recovered.degraded[0].error,
        Error::MemberThresholdNotMet { causes, .. } if matches!(causes[0], Error::DecryptionFailed)
    ));

    assert!(transports[1].corrupt("alice-0"));
    assert!(matches!(
        sb.recover("alice", TOKEN).await,
        Err(Error::GroupThresholdNotMet { .. })
    ));
}

#[tokio::test]
async fn test_other_orchestrator_cannot_decrypt() {
    let (_, nodes) = cluster(3);
    let owner = Shardbox::new(nodes.clone(), &Configuration::new()).unwrap();
    let stranger = Shardbox::new(nodes, &Configuration::new()).unwrap();
    assert_ne!(owner.nonce().unwrap(), stranger.nonce().unwrap());

    owner.setup_recovery(b"mine", "alice", TOKEN).await.unwrap();

    // shares are present, but bound to the owner's key pair
    assert!(stranger.check_recovery("alice", TOKEN).await);
    assert!(matches!(
        stranger.recover("alice", TOKEN).await,
        Err(Error::GroupThresholdNotMet { .. })
    ));
}

#[tokio::test]
async fn test_setup_failure_names_nodes() {
    let (transports, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();

    transports[0].inject(1, Fault::Status(500));
    transports[2].set_offline(true);

    let err = sb.setup_recovery(b"secret", "alice", TOKEN).await.unwrap_err();
    match err {
        Error::Nodes { nodes, causes } => {
            assert_eq!(nodes, vec!["node0", "node2"]);
            assert!(matches!(
                &causes[0],
                Error::NodeFailure { offsets, .. } if offsets == &vec![1]
            ));
            // offline node fails before any share is sent
            assert!(matches!(causes[1], Error::Network(_)));
        }
        other => panic!("unexpected error: {}", other),
    }

    // healthy node still got every share
    assert_eq!(transports[1].stored_keys(), vec!["alice-0", "alice-1"]);
    assert_eq!(transports[2].requests(Method::Post), 0);
}

#[tokio::test]
async fn test_missing_token_rejected() {
    let (_, nodes) = cluster(1);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();

    assert!(matches!(
        sb.setup_recovery(b"secret", "alice", "").await,
        Err(Error::Nodes { .. })
    ));
    assert!(!sb.check_recovery("alice", "").await);
}

#[tokio::test]
async fn test_unknown_id() {
    let (_, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();

    assert!(!sb.check_recovery("nobody", TOKEN).await);
    assert!(matches!(
        sb.recover("nobody", TOKEN).await,
        Err(Error::GroupThresholdNotMet { .. })
    ));
}

#[tokio::test]
async fn test_secret_size_limits() {
    let (_, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();

    sb.setup_recovery(&[], "empty", TOKEN).await.unwrap();
    assert!(sb.recover("empty", TOKEN).await.unwrap().is_empty());

    assert!(matches!(
        sb.setup_recovery(&[0u8; 256], "alice", TOKEN).await,
        Err(Error::InvalidSecretSize(256))
    ));

    let largest = vec![0xa5u8; 255];
    sb.setup_recovery(&largest, "alice", TOKEN).await.unwrap();
    assert_eq!(sb.recover("alice", TOKEN).await.unwrap(), largest);
}

#[tokio::test]
async fn test_single_node_single_share() {
    let (transports, nodes) = cluster(1);
    let config = Configuration::new()
        .with_group_members(1)
        .with_group_member_threshold(1);
    let sb = Shardbox::new(nodes, &config).unwrap();

    sb.setup_recovery(b"solo", "alice", TOKEN).await.unwrap();
    assert_eq!(transports[0].stored_keys(), vec!["alice-0"]);
    assert_eq!(sb.recover("alice", TOKEN).await.unwrap(), b"solo".to_vec());
}

#[test]
fn test_configuration_rejected() {
    let (_, nodes) = cluster(3);
    assert!(matches!(
        Shardbox::new(nodes.clone(), &Configuration::new().with_group_threshold(4)),
        Err(Error::GroupThresholdExceeded { threshold: 4, groups: 3 })
    ));
    assert!(matches!(
        Shardbox::new(nodes, &Configuration::new().with_group_member_threshold(3)),
        Err(Error::MemberThresholdExceeded { threshold: 3, members: 2 })
    ));
    assert!(matches!(
        Shardbox::new(Vec::new(), &Configuration::new()),
        Err(Error::InvalidConfiguration(_))
    ));
}

/// setup of `new` over an existing `old` that only reaches node2
async fn half_finished_resetup(transports: &[Arc<MemoryTransport>], sb: &Shardbox) {
    sb.setup_recovery(b"old secret", "alice", TOKEN).await.unwrap();

    transports[0].set_offline(true);
    transports[1].set_offline(true);
    assert!(matches!(
        sb.setup_recovery(b"new secret", "alice", TOKEN).await,
        Err(Error::Nodes { ref nodes, .. }) if nodes == &vec!["node0".to_string(), "node1".to_string()]
    ));
    transports[0].set_offline(false);
    transports[1].set_offline(false);
}

#[tokio::test]
async fn test_mixed_splits_recover_majority() {
    let (transports, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();
    half_finished_resetup(&transports, &sb).await;

    let recovered = sb.recover_detailed("alice", TOKEN).await.unwrap();
    assert_eq!(recovered.secret, b"old secret".to_vec());
    assert_eq!(recovered.degraded.len(), 1);
    assert_eq!(recovered.degraded[0].node, "node2");
    assert!(matches!(recovered.degraded[0].error, Error::GroupShardsMismatch));
}

#[tokio::test]
async fn test_mixed_splits_below_group_threshold() {
    let (transports, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();
    half_finished_resetup(&transports, &sb).await;

    transports[1].set_offline(true);
    let err = sb.recover_detailed("alice", TOKEN).await.unwrap_err();
    assert!(err.is_quorum());
    match err {
        Error::GroupThresholdNotMet { nodes, causes } => {
            assert_eq!(nodes, vec!["node1", "node2"]);
            assert!(matches!(causes[1], Error::GroupShardsMismatch));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_first_setups_share_keys() {
    let (transports, nodes) = cluster(3);
    let sb = Shardbox::new(nodes, &Configuration::new()).unwrap();

    let (a, b) = tokio::join!(
        sb.setup_recovery(b"one", "a", TOKEN),
        sb.setup_recovery(b"two", "b", TOKEN)
    );
    a.unwrap();
    b.unwrap();

    for t in &transports {
        assert_eq!(t.public_key_requests(), 1);
    }
    assert_eq!(sb.recover("a", TOKEN).await.unwrap(), b"one".to_vec());
    assert_eq!(sb.recover("b", TOKEN).await.unwrap(), b"two".to_vec());
}
