
use {
    launchpad_rpc::{
        lease::{FileLeaseStore, LeaseStore, DEFAULT_LEASE_EXPIRY},
        optimization::OptimizationConfig,
        signer::KeypairSigner,
        solana_rpc::testkit::{GET_ACCOUNT_INFO, SEND_TRANSACTION, SIMULATE_TRANSACTION},
        solana_rpc::SimulationResult,
        util::ms_since_epoch,
    },
    solana_sdk::{pubkey::Pubkey, signature::Keypair},
    std::{sync::Arc, time::Duration},
    testkit::{buy_request, launchpad, launchpad_with_lease},
};

#[tokio::test]
async fn touched_accounts_are_read_live_after_success() {
    let (rpc, service) = launchpad(OptimizationConfig::default());
    let signer = KeypairSigner::new(Keypair::new());
    let (a, b) = (Pubkey::new_unique(), Pubkey::new_unique());
    rpc.set_account(a, 100);
    rpc.set_account(b, 200);
    service.get_account_info(&a).await.unwrap();
    service.get_account_info(&b).await.unwrap();
    assert_eq!(rpc.calls(GET_ACCOUNT_INFO), 2);

    let outcome = service
        .submit_transaction(&signer, buy_request(&[a, b], &[]))
        .await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Purchase complete");

    rpc.set_account(a, 90);
    rpc.set_account(b, 210);
    let a_after = service.get_account_info(&a).await.unwrap().unwrap();
    let b_after = service.get_account_info(&b).await.unwrap().unwrap();
    assert_eq!((a_after.lamports, b_after.lamports), (90, 210));
    assert_eq!(rpc.calls(GET_ACCOUNT_INFO), 4);

    service.dispose().await;
}

#[tokio::test]
async fn fresh_lease_on_disk_blocks_submission() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("submission.lease");

    // written by an earlier run of the process
    let previous = FileLeaseStore::new(&path);
    assert!(previous
        .try_acquire(ms_since_epoch(), DEFAULT_LEASE_EXPIRY)
        .await
        .unwrap());

    let (rpc, service) = launchpad_with_lease(
        OptimizationConfig::default(),
        Arc::new(FileLeaseStore::new(&path)),
    );
    let signer = KeypairSigner::new(Keypair::new());

    let outcome = service
        .submit_transaction(&signer, buy_request(&[Pubkey::new_unique()], &[]))
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "previous transaction still processing");
    assert_eq!(rpc.calls(SIMULATE_TRANSACTION), 0);
    assert!(path.exists());
}

#[tokio::test]
async fn abandoned_lease_on_disk_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("submission.lease");
    let previous = FileLeaseStore::new(&path);
    let held_since = ms_since_epoch() - DEFAULT_LEASE_EXPIRY.as_millis() as u64 - 500;
    assert!(previous
        .try_acquire(held_since, DEFAULT_LEASE_EXPIRY)
        .await
        .unwrap());

    let (rpc, service) = launchpad_with_lease(
        OptimizationConfig::default(),
        Arc::new(FileLeaseStore::new(&path)),
    );
    let signer = KeypairSigner::new(Keypair::new());

    let outcome = service
        .submit_transaction(&signer, buy_request(&[Pubkey::new_unique()], &[]))
        .await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(rpc.calls(SEND_TRANSACTION), 1);
    // released once the submission completed
    assert!(!path.exists());

    service.dispose().await;
}

#[tokio::test]
async fn failed_simulation_keeps_cache_and_lease_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("submission.lease");
    let (rpc, service) = launchpad_with_lease(
        OptimizationConfig::default(),
        Arc::new(FileLeaseStore::new(&path)),
    );
    let signer = KeypairSigner::new(Keypair::new());
    let a = Pubkey::new_unique();
    rpc.set_account(a, 1);
    service.get_account_info(&a).await.unwrap();

    rpc.set_simulation(SimulationResult {
        err: Some("InsufficientFundsForRent { account_index: 0 }".to_owned()),
        logs: vec!["Program log: Error: insufficient funds".to_owned()],
    });
    let outcome = service
        .submit_transaction(&signer, buy_request(&[a], &[]))
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.message,
        "transaction simulation failed: Insufficient funds for this transaction"
    );
    assert!(!path.exists());
    assert_eq!(rpc.calls(SEND_TRANSACTION), 0);
    assert!(service.accounts().account_entry(&a).is_some());
}

#[tokio::test(start_paused = true)]
async fn delayed_invalidation_clears_late_reads() {
    let (rpc, service) = launchpad(OptimizationConfig::default());
    let signer = KeypairSigner::new(Keypair::new());
    let a = Pubkey::new_unique();
    rpc.set_account(a, 1);

    let outcome = service
        .submit_transaction(&signer, buy_request(&[a], &[]))
        .await;
    assert!(outcome.success, "{}", outcome.message);

    // a read racing the confirmation caches a value the node had not caught up on
    service.get_account_info(&a).await.unwrap();
    assert!(service.accounts().account_entry(&a).is_some());

    tokio::time::advance(Duration::from_millis(600)).await;
    tokio::task::yield_now().await;
    assert!(service.accounts().account_entry(&a).is_none());
}
