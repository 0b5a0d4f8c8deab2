
use {
    launchpad_rpc::{
        optimization::{BreakerState, Feature, OptimizationConfig},
        solana_rpc::{
            testkit::{GET_ACCOUNT_INFO, GET_LATEST_BLOCKHASH},
            RpcError,
        },
    },
    solana_sdk::pubkey::Pubkey,
    std::time::Duration,
    testkit::launchpad,
    tokio::time::advance,
};

#[tokio::test(start_paused = true)]
async fn error_burst_trips_breaker_and_bypasses_cache() {
    let (rpc, service) = launchpad(OptimizationConfig {
        max_errors_per_minute: 5,
        ..Default::default()
    });
    let healthy = Pubkey::new_unique();
    rpc.set_account(healthy, 10);
    service.get_account_info(&healthy).await.unwrap();
    service.get_account_info(&healthy).await.unwrap();
    assert_eq!(rpc.calls(GET_ACCOUNT_INFO), 1);

    // six consecutive errors inside ten seconds
    rpc.fail_always(GET_LATEST_BLOCKHASH, Some(RpcError::Transient("503 Service Unavailable".to_owned())));
    for _ in 0..6 {
        assert!(service.get_blockhash().await.is_err());
        advance(Duration::from_millis(1_500)).await;
    }

    let status = service.get_status();
    assert_eq!(status.optimizations.breaker, BreakerState::Tripped);
    assert_eq!(status.optimizations.errors_in_window, 6);
    assert!(Feature::all().all(|feature| !service.optimizations().should_use(feature)));
    // stored flags survive the trip
    assert!(status.optimizations.config.account_caching);

    // the cached entry is still fresh, yet every read now goes to the node
    let before = rpc.calls(GET_ACCOUNT_INFO);
    service.get_account_info(&healthy).await.unwrap();
    service.get_account_info(&healthy).await.unwrap();
    assert_eq!(rpc.calls(GET_ACCOUNT_INFO), before + 2);

    // no automatic recovery
    advance(Duration::from_secs(300)).await;
    assert!(service.optimizations().is_tripped());

    rpc.fail_always(GET_LATEST_BLOCKHASH, None);
    service.rearm();
    assert_eq!(service.get_status().optimizations.breaker, BreakerState::Armed);
    service.get_account_info(&healthy).await.unwrap();
    service.get_account_info(&healthy).await.unwrap();
    assert_eq!(rpc.calls(GET_ACCOUNT_INFO), before + 3);
}

#[tokio::test(start_paused = true)]
async fn slow_error_trickle_never_trips() {
    let (rpc, service) = launchpad(OptimizationConfig {
        max_errors_per_minute: 3,
        ..Default::default()
    });
    rpc.fail_always(GET_ACCOUNT_INFO, Some(RpcError::Transient("timeout".to_owned())));

    for _ in 0..10 {
        assert!(service.get_account_info(&Pubkey::new_unique()).await.is_err());
        advance(Duration::from_secs(31)).await;
    }
    assert!(!service.optimizations().is_tripped());
}

#[tokio::test(start_paused = true)]
async fn stale_fallback_stops_at_three_ttls() {
    let (rpc, service) = launchpad(OptimizationConfig {
        account_cache_ttl: Duration::from_millis(100),
        ..Default::default()
    });
    let a = Pubkey::new_unique();
    rpc.set_account(a, 10);
    service.get_account_info(&a).await.unwrap();

    rpc.fail_always(GET_ACCOUNT_INFO, Some(RpcError::Transient("timeout".to_owned())));
    advance(Duration::from_millis(250)).await;
    let stale = service.get_account_info(&a).await.unwrap().unwrap();
    assert_eq!(stale.lamports, 10);

    advance(Duration::from_millis(100)).await;
    assert!(matches!(
        service.get_account_info(&a).await,
        Err(RpcError::Transient(_))
    ));
}
