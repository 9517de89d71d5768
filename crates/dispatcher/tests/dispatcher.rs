//! End-to-end dispatcher tests over the memory store, static chain state,
//! and scripted operator clients.

use dahlia_chain::StaticChainState;
use dahlia_dispatcher::{
    BeforeDispatchFn, BlobSet, DispatchError, Dispatcher, DispatcherConfig, HeartbeatMessage,
    QuorumThresholds, SecurityThresholds, SignatureAggregator, COMPONENT,
};
use dahlia_network_memory::{MemoryClientManager, MockBehavior, MockNodeClient};
use dahlia_storage::{BlobMetadataStore, StorageError};
use dahlia_storage_memory::MemoryBlobStore;
use dahlia_types::{
    AccountId, BlobCertificate, BlobCommitments, BlobHeader, BlobKey, BlobMetadata, BlobStatus,
    BlobVersion, OperatorId, PaymentMetadata, QuorumId, RelayKey,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BLOCK_NUMBER: u64 = 100;
const FINALIZATION_BLOCK_DELAY: u64 = 10;
const REFERENCE_BLOCK: u64 = BLOCK_NUMBER - FINALIZATION_BLOCK_DELAY;
const MAX_BATCH_SIZE: u32 = 5;

fn op_id(seed: u8) -> OperatorId {
    OperatorId::new([seed; 32])
}

/// Stake table shared by most tests: quorum 0 is {op0: 1, op1: 1}, quorum 1
/// is {op0: 1, op1: 3, op2: 1}.
fn stake_table() -> BTreeMap<QuorumId, BTreeMap<OperatorId, u64>> {
    BTreeMap::from([
        (
            QuorumId(0),
            BTreeMap::from([(op_id(0), 1), (op_id(1), 1)]),
        ),
        (
            QuorumId(1),
            BTreeMap::from([(op_id(0), 1), (op_id(1), 3), (op_id(2), 1)]),
        ),
    ])
}

struct Harness {
    dispatcher: Arc<Dispatcher<MemoryBlobStore, StaticChainState, MemoryClientManager>>,
    store: Arc<MemoryBlobStore>,
    chain: Arc<StaticChainState>,
    clients: Arc<MemoryClientManager>,
    blob_set: Arc<BlobSet>,
    heartbeats: mpsc::Receiver<HeartbeatMessage>,
    callback_keys: Arc<Mutex<Vec<BlobKey>>>,
}

fn harness(thresholds: QuorumThresholds) -> Harness {
    harness_with_config(
        thresholds,
        DispatcherConfig {
            pull_interval: Duration::from_millis(50),
            finalization_block_delay: FINALIZATION_BLOCK_DELAY,
            attestation_timeout: Duration::from_millis(200),
            batch_attestation_timeout: Duration::from_secs(2),
            signature_tick_interval: Duration::from_millis(25),
            num_request_retries: 1,
            max_batch_size: MAX_BATCH_SIZE,
            num_concurrent_requests: 4,
        },
    )
}

fn harness_with_config(thresholds: QuorumThresholds, config: DispatcherConfig) -> Harness {
    let store = Arc::new(MemoryBlobStore::new());
    let chain = Arc::new(StaticChainState::from_stakes(BLOCK_NUMBER, &stake_table()));
    let clients = Arc::new(MemoryClientManager::new());
    let blob_set = Arc::new(BlobSet::new());
    let (liveness_tx, heartbeats) = mpsc::channel(100);

    let callback_keys = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&callback_keys);
    let before_dispatch: BeforeDispatchFn = Arc::new(move |key: BlobKey| {
        recorded.lock().push(key);
        Ok(())
    });

    let dispatcher = Arc::new(
        Dispatcher::new(
            config,
            Arc::clone(&store),
            Arc::clone(&chain),
            Arc::clone(&clients),
            SignatureAggregator::new(thresholds),
            Arc::clone(&blob_set),
            Some(before_dispatch),
            liveness_tx,
        )
        .unwrap(),
    );

    Harness {
        dispatcher,
        store,
        chain,
        clients,
        blob_set,
        heartbeats,
        callback_keys,
    }
}

impl Harness {
    /// Script one operator's `StoreChunks` behavior.
    fn register(&self, seed: u8, behavior: MockBehavior) -> Arc<MockNodeClient> {
        let socket = self.chain.socket(op_id(seed)).unwrap().clone();
        self.clients.register(socket, behavior)
    }

    /// Script an operator to sign with its registered key.
    fn register_signer(&self, seed: u8) -> Arc<MockNodeClient> {
        let key = self.chain.secret_key(op_id(seed)).unwrap().clone();
        self.register(seed, MockBehavior::Sign(key))
    }

    /// Seed `count` encoded blobs on `quorums`, with ascending `updated_at`
    /// starting at `base_ts`. Returns the keys in insertion order.
    async fn seed_blobs(&self, seed0: u8, count: u8, quorums: &[u8], base_ts: u64) -> Vec<BlobKey> {
        let mut keys = Vec::new();
        for i in 0..count {
            let header = blob_header(seed0 + i, quorums);
            keys.push(header.blob_key());
            self.store
                .put_blob_metadata(BlobMetadata {
                    blob_header: header.clone(),
                    status: BlobStatus::Encoded,
                    expiry: u64::MAX,
                    num_retries: 0,
                    updated_at: base_ts + i as u64,
                })
                .await
                .unwrap();
            self.store
                .put_certificate(BlobCertificate {
                    blob_header: header,
                    signature: Vec::new(),
                    relay_keys: vec![RelayKey(0), RelayKey(1), RelayKey(2)],
                })
                .await
                .unwrap();
        }
        keys
    }

    /// Run one full batch: build, fan out, collect.
    async fn run_batch(&self) -> Result<dahlia_types::BatchData, DispatchError> {
        let cancel = CancellationToken::new();
        let batch_data = self.dispatcher.new_batch(REFERENCE_BLOCK).await?;
        let rx = self.dispatcher.handle_batch(&cancel, &batch_data).await?;
        self.dispatcher
            .handle_signatures(&cancel, &batch_data, rx)
            .await?;
        Ok(batch_data)
    }

    async fn status_of(&self, key: BlobKey) -> BlobStatus {
        self.store.get_blob_metadata(key).await.unwrap().status
    }

    fn drain_heartbeats(&mut self) -> Vec<HeartbeatMessage> {
        let mut seen = Vec::new();
        while let Ok(hb) = self.heartbeats.try_recv() {
            seen.push(hb);
        }
        seen
    }
}

fn blob_header(seed: u8, quorums: &[u8]) -> BlobHeader {
    BlobHeader {
        version: BlobVersion(0),
        quorum_numbers: quorums.iter().copied().map(QuorumId).collect(),
        commitments: BlobCommitments {
            commitment: vec![seed, 1, 2, 3],
            length_commitment: vec![seed, 4],
            length_proof: vec![seed, 5],
            length: 64,
        },
        payment: PaymentMetadata {
            account: AccountId([seed; 20]),
            timestamp: seed as u64,
            cumulative_payment: 532,
        },
    }
}

fn assert_heartbeats(seen: &[HeartbeatMessage]) {
    assert!(!seen.is_empty(), "expected at least one heartbeat");
    for hb in seen {
        assert_eq!(hb.component, COMPONENT);
    }
    for pair in seen.windows(2) {
        assert!(
            pair[1].timestamp >= pair[0].timestamp,
            "timestamps should not decrease"
        );
    }
}

#[tokio::test]
async fn happy_path_all_operators_sign() {
    let mut h = harness(QuorumThresholds::default());
    for seed in 0..3 {
        h.register_signer(seed);
    }
    let keys = h.seed_blobs(10, 2, &[0, 1], 1_000).await;

    let batch_data = h.run_batch().await.unwrap();
    assert_eq!(batch_data.blob_keys, keys);
    assert_eq!(batch_data.batch.header.reference_block_number, REFERENCE_BLOCK);
    assert_eq!(
        batch_data.batch_header_hash,
        batch_data.batch.header.hash()
    );

    // The before-dispatch callback saw every key, and the in-flight set is
    // drained once the batch finishes.
    assert_eq!(h.callback_keys.lock().clone(), keys);
    assert_eq!(h.blob_set.size(), 0);

    for key in &keys {
        assert_eq!(h.status_of(*key).await, BlobStatus::Complete);
    }

    // Batch header and inclusion infos are readable and the proofs verify.
    let bhh = batch_data.batch_header_hash;
    let header = h.store.get_batch_header(bhh).await.unwrap();
    assert_eq!(header, batch_data.batch.header);
    for (i, key) in keys.iter().enumerate() {
        let info = h.store.get_inclusion_info(*key, bhh).await.unwrap();
        assert_eq!(info.blob_index as usize, i);
        assert_eq!(info.batch_root, header.batch_root);
        let leaf = batch_data.batch.blob_certificates[i].hash();
        assert!(info.inclusion_proof.verify(leaf, info.batch_root));
    }

    // Full attestation across both quorums.
    let att = h.store.get_attestation(bhh).await.unwrap();
    assert_eq!(att.batch_header, header);
    assert!(att.attested_at > 0);
    assert!(att.non_signer_pubkeys.is_empty());
    assert!(att.apk_g2.is_some());
    assert!(att.sigma.is_some());
    assert_eq!(att.quorum_apks.len(), 2);
    assert_eq!(att.quorum_numbers, vec![QuorumId(0), QuorumId(1)]);
    assert_eq!(att.quorum_result(QuorumId(0)), Some(100));
    assert_eq!(att.quorum_result(QuorumId(1)), Some(100));

    assert_heartbeats(&h.drain_heartbeats());
}

#[tokio::test]
async fn insufficient_stake_fails_all_blobs_at_default_threshold() {
    let mut h = harness(QuorumThresholds::default());
    h.register(0, MockBehavior::Fail);
    h.register(1, MockBehavior::Fail);
    h.register_signer(2);

    // X, Y need both quorums; Z needs only quorum 1.
    let failed = h.seed_blobs(10, 2, &[0, 1], 1_000).await;
    let z = h.seed_blobs(20, 1, &[1], 2_000).await;

    let batch_data = h.run_batch().await.unwrap();

    // op2 alone carries 20% of quorum 1 and 0% of quorum 0 -- below the
    // 55% default everywhere, so nothing attests.
    for key in failed.iter().chain(z.iter()) {
        assert_eq!(h.status_of(*key).await, BlobStatus::Failed);
    }

    // The empty attestation is still persisted for auditability.
    let att = h
        .store
        .get_attestation(batch_data.batch_header_hash)
        .await
        .unwrap();
    assert!(att.is_empty());
    assert!(att.apk_g2.is_none());
    assert!(att.sigma.is_none());
    assert!(att.quorum_numbers.is_empty());
    assert!(att.quorum_results.is_empty());
    assert!(att.quorum_apks.is_empty());
    assert!(att.non_signer_pubkeys.is_empty());

    assert_heartbeats(&h.drain_heartbeats());
}

#[tokio::test]
async fn partial_quorum_success_with_lowered_threshold() {
    let thresholds = QuorumThresholds::uniform(SecurityThresholds {
        confirmation_threshold: 20,
        adversarial_threshold: 10,
    });
    let h = harness(thresholds);
    h.register(0, MockBehavior::Fail);
    h.register(1, MockBehavior::Fail);
    h.register_signer(2);

    let failed = h.seed_blobs(10, 2, &[0, 1], 1_000).await;
    let complete = h.seed_blobs(20, 1, &[1], 2_000).await;

    let batch_data = h.run_batch().await.unwrap();

    // Quorum 1 reaches exactly 20% and attests; quorum 0 stays at 0%.
    for key in &failed {
        assert_eq!(h.status_of(*key).await, BlobStatus::Failed);
    }
    assert_eq!(h.status_of(complete[0]).await, BlobStatus::Complete);

    let att = h
        .store
        .get_attestation(batch_data.batch_header_hash)
        .await
        .unwrap();
    assert_eq!(att.quorum_numbers, vec![QuorumId(1)]);
    assert_eq!(att.quorum_result(QuorumId(0)), Some(0));
    assert_eq!(att.quorum_result(QuorumId(1)), Some(20));
    assert_eq!(att.non_signer_pubkeys.len(), 2);
    assert_eq!(att.quorum_apks.len(), 1);
}

#[tokio::test]
async fn total_silence_persists_empty_attestation() {
    let h = harness(QuorumThresholds::default());
    for seed in 0..3 {
        h.register(seed, MockBehavior::Fail);
    }
    let both = h.seed_blobs(10, 2, &[0, 1], 1_000).await;
    let only_one = h.seed_blobs(20, 1, &[1], 2_000).await;

    let batch_data = h.run_batch().await.unwrap();

    for key in both.iter().chain(only_one.iter()) {
        assert_eq!(h.status_of(*key).await, BlobStatus::Failed);
    }

    let att = h
        .store
        .get_attestation(batch_data.batch_header_hash)
        .await
        .unwrap();
    assert!(att.is_empty());
    assert!(att.quorum_results.is_empty());
}

#[tokio::test]
async fn max_batch_size_paginates_the_queue() {
    let h = harness(QuorumThresholds::default());
    let keys = h.seed_blobs(10, 12, &[0, 1], 1_000).await;

    let first = h.dispatcher.new_batch(REFERENCE_BLOCK).await.unwrap();
    assert_eq!(&first.blob_keys[..], &keys[..5]);

    let second = h.dispatcher.new_batch(REFERENCE_BLOCK).await.unwrap();
    assert_eq!(&second.blob_keys[..], &keys[5..10]);

    let third = h.dispatcher.new_batch(REFERENCE_BLOCK).await.unwrap();
    assert_eq!(&third.blob_keys[..], &keys[10..]);

    assert!(matches!(
        h.dispatcher.new_batch(REFERENCE_BLOCK).await,
        Err(DispatchError::NoBlobsToDispatch)
    ));
}

#[tokio::test]
async fn stale_blob_picked_up_after_cursor_reset() {
    let h = harness(QuorumThresholds::default());
    let keys = h.seed_blobs(10, 6, &[0, 1], 1_000).await;

    // First batch advances the cursor past position 1004.
    let first = h.dispatcher.new_batch(REFERENCE_BLOCK).await.unwrap();
    assert_eq!(&first.blob_keys[..], &keys[..5]);

    // A retry lands with an older timestamp than the cursor.
    let stale = h.seed_blobs(40, 1, &[0, 1], 500).await;

    // The next batch only sees what is ahead of the cursor, and its
    // partial page resets the cursor.
    let second = h.dispatcher.new_batch(REFERENCE_BLOCK).await.unwrap();
    assert_eq!(second.blob_keys, vec![keys[5]]);

    // The full sweep picks the stale blob up.
    let third = h.dispatcher.new_batch(REFERENCE_BLOCK).await.unwrap();
    assert_eq!(third.blob_keys, stale);
}

#[tokio::test]
async fn in_flight_blob_is_deduplicated() {
    let h = harness(QuorumThresholds::default());
    let keys = h.seed_blobs(10, 1, &[0, 1], 1_000).await;

    h.blob_set.add_blob(keys[0]);
    assert!(matches!(
        h.dispatcher.new_batch(REFERENCE_BLOCK).await,
        Err(DispatchError::NoBlobsToDispatch)
    ));

    // Once released, the same blob batches normally.
    h.blob_set.remove_blob(&keys[0]);
    let batch_data = h.dispatcher.new_batch(REFERENCE_BLOCK).await.unwrap();
    assert_eq!(batch_data.blob_keys, keys);
}

#[tokio::test]
async fn transient_operator_failure_is_retried() {
    let h = harness(QuorumThresholds::default());
    let key0 = h.chain.secret_key(op_id(0)).unwrap().clone();
    let flaky = h.register(0, MockBehavior::FailThenSign(1, key0));
    h.register_signer(1);
    h.register_signer(2);

    let keys = h.seed_blobs(10, 1, &[0, 1], 1_000).await;
    h.run_batch().await.unwrap();

    assert_eq!(h.status_of(keys[0]).await, BlobStatus::Complete);
    assert_eq!(flaky.attempts(), 2);
}

#[tokio::test]
async fn invalid_signature_discarded_and_operator_counted_as_non_signer() {
    let thresholds = QuorumThresholds::uniform(SecurityThresholds {
        confirmation_threshold: 50,
        adversarial_threshold: 25,
    });
    let h = harness(thresholds);
    let key0 = h.chain.secret_key(op_id(0)).unwrap().clone();
    h.register(0, MockBehavior::SignWithWrongKey(key0));
    h.register_signer(1);

    let keys = h.seed_blobs(10, 1, &[0], 1_000).await;
    let batch_data = h.run_batch().await.unwrap();

    // op1's half of quorum 0 meets the 50% threshold on its own.
    assert_eq!(h.status_of(keys[0]).await, BlobStatus::Complete);
    let att = h
        .store
        .get_attestation(batch_data.batch_header_hash)
        .await
        .unwrap();
    assert_eq!(att.quorum_result(QuorumId(0)), Some(50));
    assert_eq!(att.non_signer_pubkeys.len(), 1);
    assert_eq!(
        att.non_signer_pubkeys[0],
        h.chain.public_key(op_id(0)).unwrap()
    );
}

#[tokio::test]
async fn slow_operator_times_out_and_contributes_nothing() {
    let thresholds = QuorumThresholds::uniform(SecurityThresholds {
        confirmation_threshold: 40,
        adversarial_threshold: 20,
    });
    let config = DispatcherConfig {
        attestation_timeout: Duration::from_millis(100),
        batch_attestation_timeout: Duration::from_secs(1),
        num_request_retries: 0,
        finalization_block_delay: FINALIZATION_BLOCK_DELAY,
        max_batch_size: MAX_BATCH_SIZE,
        ..DispatcherConfig::default()
    };
    let h = harness_with_config(thresholds, config);

    let key0 = h.chain.secret_key(op_id(0)).unwrap().clone();
    h.register(
        0,
        MockBehavior::DelayThenSign(Duration::from_secs(5), key0),
    );
    h.register_signer(1);
    h.register_signer(2);

    let keys = h.seed_blobs(10, 1, &[0, 1], 1_000).await;
    let batch_data = h.run_batch().await.unwrap();

    // op1 alone covers 50% of quorum 0 and op1+op2 cover 80% of quorum 1;
    // both clear the lowered threshold without op0.
    assert_eq!(h.status_of(keys[0]).await, BlobStatus::Complete);
    let att = h
        .store
        .get_attestation(batch_data.batch_header_hash)
        .await
        .unwrap();
    assert_eq!(att.non_signer_pubkeys.len(), 1);
    assert_eq!(att.quorum_result(QuorumId(0)), Some(50));
    assert_eq!(att.quorum_result(QuorumId(1)), Some(80));
}

#[tokio::test]
async fn rerunning_a_batch_is_idempotent() {
    let h = harness(QuorumThresholds::default());
    for seed in 0..3 {
        h.register_signer(seed);
    }
    let keys = h.seed_blobs(10, 2, &[0, 1], 1_000).await;

    let batch_data = h.run_batch().await.unwrap();
    let att_before = h
        .store
        .get_attestation(batch_data.batch_header_hash)
        .await
        .unwrap();

    // Crash-replay: drive the same BatchData through fan-out and
    // collection again. Every write is keyed, so nothing duplicates and
    // nothing errors.
    let cancel = CancellationToken::new();
    let rx = h.dispatcher.handle_batch(&cancel, &batch_data).await.unwrap();
    h.dispatcher
        .handle_signatures(&cancel, &batch_data, rx)
        .await
        .unwrap();

    let att_after = h
        .store
        .get_attestation(batch_data.batch_header_hash)
        .await
        .unwrap();
    assert_eq!(att_before, att_after);
    for key in &keys {
        assert_eq!(h.status_of(*key).await, BlobStatus::Complete);
        let info = h
            .store
            .get_inclusion_info(*key, batch_data.batch_header_hash)
            .await;
        assert!(info.is_ok());
    }
}

#[tokio::test]
async fn missing_certificate_drops_blob_but_keeps_batch() {
    let h = harness(QuorumThresholds::default());
    for seed in 0..3 {
        h.register_signer(seed);
    }
    let keys = h.seed_blobs(10, 2, &[0, 1], 1_000).await;

    // Orphan one metadata record: Encoded, but no certificate stored.
    let orphan = blob_header(50, &[0, 1]);
    let orphan_key = orphan.blob_key();
    h.store
        .put_blob_metadata(BlobMetadata {
            blob_header: orphan,
            status: BlobStatus::Encoded,
            expiry: u64::MAX,
            num_retries: 0,
            updated_at: 999,
        })
        .await
        .unwrap();

    let batch_data = h.dispatcher.new_batch(REFERENCE_BLOCK).await.unwrap();
    assert_eq!(batch_data.blob_keys, keys);
    assert!(!batch_data.blob_keys.contains(&orphan_key));

    // The orphan stays Encoded; it was dropped, not claimed.
    assert_eq!(h.status_of(orphan_key).await, BlobStatus::Encoded);
    assert_eq!(
        h.store.get_certificate(orphan_key).await,
        Err(StorageError::NotFound)
    );
}

#[tokio::test]
async fn run_loop_drives_blobs_to_terminal_status() {
    let mut h = harness(QuorumThresholds::default());
    for seed in 0..3 {
        h.register_signer(seed);
    }
    let keys = h.seed_blobs(10, 3, &[0, 1], 1_000).await;

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&h.dispatcher).run(cancel.clone()));

    // Wait for the loop to finish both blobs or give up after 5s.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut done = true;
        for key in &keys {
            if !h.status_of(*key).await.is_terminal() {
                done = false;
            }
        }
        if done {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "blobs never reached a terminal status"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for key in &keys {
        assert_eq!(h.status_of(*key).await, BlobStatus::Complete);
    }

    cancel.cancel();
    handle.await.unwrap();

    assert_heartbeats(&h.drain_heartbeats());
}
