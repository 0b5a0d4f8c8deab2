use {
    crate::{
        cache::{CacheEntry, EntryStore, Served},
        metrics::{self, CacheResult},
        optimization::{Feature, OptimizationManager},
        solana_rpc::{RpcError, SharedChainRpc},
    },
    serde::{Deserialize, Serialize},
    solana_sdk::{account::Account, clock::Slot, pubkey::Pubkey},
    std::{future::Future, sync::Arc},
    tracing::{debug, info},
};

const ACCOUNTS: &str = "accounts";
const BALANCES: &str = "balances";
const METADATA: &str = "metadata";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSizes {
    pub accounts: usize,
    pub balances: usize,
    pub metadata: usize,
}

fn missing_as_none<T>(result: Result<T, RpcError>) -> Result<Option<T>, RpcError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.is_account_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

const fn cache_result(served: Served) -> CacheResult {
    match served {
        Served::Cached => CacheResult::Hit,
        Served::Live => CacheResult::Miss,
        Served::Stale => CacheResult::Stale,
    }
}

///
/// Read path in front of the node: accounts, token balances and off-chain
/// metadata documents, each gated by its optimization flag.
///
/// Every upstream failure, including ones hidden by a stale fallback, is
/// reported to the [`OptimizationManager`].
///
pub struct AccountCache {
    rpc: SharedChainRpc,
    optimizations: Arc<OptimizationManager>,
    accounts: EntryStore<Pubkey, Account>,
    balances: EntryStore<Pubkey, f64>,
    metadata: EntryStore<String, serde_json::Value>,
}

impl AccountCache {
    pub fn new(rpc: SharedChainRpc, optimizations: Arc<OptimizationManager>) -> Self {
        Self {
            rpc,
            optimizations,
            accounts: EntryStore::new(ACCOUNTS),
            balances: EntryStore::new(BALANCES),
            metadata: EntryStore::new(METADATA),
        }
    }

    /// A missing account is `None` whether or not the cache is in use.
    pub async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, RpcError> {
        if !self.optimizations.should_use(Feature::AccountCaching) {
            metrics::cache_request(ACCOUNTS, CacheResult::Bypass);
            return missing_as_none(self.fetch_account(*address).await.map(|(account, _)| account));
        }

        let ttl = self.optimizations.ttl(Feature::AccountCaching);
        let result = self
            .accounts
            .get_or_fetch(address, ttl, self.fallback(), || self.fetch_account(*address))
            .await
            .map(|(account, served)| {
                self.record(ACCOUNTS, address, served);
                account
            });
        missing_as_none(result)
    }

    ///
    /// Answers in the order of `addresses`. With batching on, everything not
    /// fresh in the cache is fetched with one `getMultipleAccounts` call.
    ///
    pub async fn get_multiple_accounts_info(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, RpcError> {
        if !self.optimizations.should_use(Feature::AccountCaching) {
            metrics::cache_request(ACCOUNTS, CacheResult::Bypass);
            return self
                .fetch_accounts(addresses.to_vec())
                .await
                .map(|(accounts, _)| accounts);
        }

        let ttl = self.optimizations.ttl(Feature::AccountCaching);
        let fallback = self.fallback();
        if self.optimizations.should_use(Feature::BatchQueries) {
            let served = self
                .accounts
                .get_batch(
                    addresses,
                    ttl,
                    fallback,
                    |missing| self.fetch_accounts(missing),
                    |address| self.fetch_account(address),
                )
                .await?;
            let accounts = addresses
                .iter()
                .zip(served)
                .map(|(address, served)| {
                    served.map(|(account, served)| {
                        self.record(ACCOUNTS, address, served);
                        account
                    })
                })
                .collect();
            return Ok(accounts);
        }

        let mut accounts = Vec::with_capacity(addresses.len());
        for address in addresses {
            let result = self
                .accounts
                .get_or_fetch(address, ttl, fallback, || self.fetch_account(*address))
                .await
                .map(|(account, served)| {
                    self.record(ACCOUNTS, address, served);
                    account
                });
            accounts.push(missing_as_none(result)?);
        }
        Ok(accounts)
    }

    /// UI amount of a token account. A missing account is a zero balance and is cached as such.
    pub async fn get_token_balance(&self, address: &Pubkey) -> Result<f64, RpcError> {
        if !self.optimizations.should_use(Feature::BalanceCaching) {
            metrics::cache_request(BALANCES, CacheResult::Bypass);
            return self.fetch_balance(*address).await.map(|(balance, _)| balance);
        }

        let ttl = self.optimizations.ttl(Feature::BalanceCaching);
        let (balance, served) = self
            .balances
            .get_or_fetch(address, ttl, self.fallback(), || self.fetch_balance(*address))
            .await?;
        self.record(BALANCES, address, served);
        Ok(balance)
    }

    ///
    /// Off-chain metadata (token JSON documents) keyed by URI. The caller supplies
    /// the fetcher; the cache only applies the TTL and stale-fallback policy.
    ///
    pub async fn get_metadata<F, Fut>(&self, uri: &str, fetcher: F) -> Result<serde_json::Value, RpcError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, RpcError>>,
    {
        let fetch = move || async move {
            fetcher().await.map(|value| (value, None)).map_err(|error| {
                self.optimizations.report_error(&error);
                error
            })
        };

        if !self.optimizations.should_use(Feature::MetadataCaching) {
            metrics::cache_request(METADATA, CacheResult::Bypass);
            return fetch().await.map(|(value, _)| value);
        }

        let ttl = self.optimizations.ttl(Feature::MetadataCaching);
        let key = uri.to_owned();
        let (value, served) = self
            .metadata
            .get_or_fetch(&key, ttl, self.fallback(), fetch)
            .await?;
        self.record(METADATA, &key, served);
        Ok(value)
    }

    pub fn account_entry(&self, address: &Pubkey) -> Option<CacheEntry<Account>> {
        self.accounts.get_entry(address)
    }

    pub fn balance_entry(&self, address: &Pubkey) -> Option<CacheEntry<f64>> {
        self.balances.get_entry(address)
    }

    /// Drops the cached account and balance for `address`. Returns how many entries went away.
    pub fn invalidate(&self, address: &Pubkey) -> usize {
        usize::from(self.accounts.invalidate(address)) + usize::from(self.balances.invalidate(address))
    }

    pub fn invalidate_all(&self) -> usize {
        self.accounts.invalidate_all() + self.balances.invalidate_all() + self.metadata.invalidate_all()
    }

    pub fn sizes(&self) -> CacheSizes {
        CacheSizes {
            accounts: self.accounts.len(),
            balances: self.balances.len(),
            metadata: self.metadata.len(),
        }
    }

    fn fallback(&self) -> bool {
        self.optimizations.config().enable_fallback_mode
    }

    fn report(&self, error: RpcError) -> RpcError {
        if !error.is_account_not_found() {
            self.optimizations.report_error(&error);
        }
        error
    }

    fn record(&self, cache: &'static str, key: &dyn std::fmt::Display, served: Served) {
        metrics::cache_request(cache, cache_result(served));
        if self.optimizations.config().logging {
            info!(cache, key = %key, served = ?served, "cache lookup");
        } else {
            debug!(cache, key = %key, served = ?served, "cache lookup");
        }
    }

    async fn fetch_account(&self, address: Pubkey) -> Result<(Account, Option<Slot>), RpcError> {
        match self.rpc.get_account_info(&address).await {
            Ok((Some(account), slot)) => Ok((account, Some(slot))),
            Ok((None, _)) => Err(RpcError::AccountNotFound(address.to_string())),
            Err(error) => Err(self.report(error)),
        }
    }

    async fn fetch_accounts(
        &self,
        addresses: Vec<Pubkey>,
    ) -> Result<(Vec<Option<Account>>, Option<Slot>), RpcError> {
        self.rpc
            .get_multiple_accounts_info(&addresses)
            .await
            .map(|(accounts, slot)| (accounts, Some(slot)))
            .map_err(|error| self.report(error))
    }

    async fn fetch_balance(&self, address: Pubkey) -> Result<(f64, Option<Slot>), RpcError> {
        match self.rpc.get_token_account_balance(&address).await {
            Ok((balance, slot)) => Ok((balance, Some(slot))),
            Err(error) if error.is_account_not_found() => Ok((0.0, None)),
            Err(error) => Err(self.report(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            optimization::{ConfigUpdate, OptimizationConfig},
            solana_rpc::testkit::{
                MockChainRpc, GET_ACCOUNT_INFO, GET_MULTIPLE_ACCOUNTS, GET_TOKEN_ACCOUNT_BALANCE,
            },
        },
        std::time::Duration,
        tokio::time::advance,
    };

    const TTL: Duration = Duration::from_millis(100);

    fn setup(config: OptimizationConfig) -> (Arc<MockChainRpc>, Arc<OptimizationManager>, AccountCache) {
        let rpc = Arc::new(MockChainRpc::new());
        let optimizations = Arc::new(OptimizationManager::new(config));
        let cache = AccountCache::new(Arc::clone(&rpc) as SharedChainRpc, Arc::clone(&optimizations));
        (rpc, optimizations, cache)
    }

    fn short_ttls() -> OptimizationConfig {
        OptimizationConfig {
            account_cache_ttl: TTL,
            balance_cache_ttl: TTL,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn account_reads_follow_ttl() {
        let (rpc, _, cache) = setup(short_ttls());
        let a = Pubkey::new_unique();
        rpc.set_account(a, 10);

        let account = cache.get_account_info(&a).await.unwrap().unwrap();
        assert_eq!(account.lamports, 10);

        advance(Duration::from_millis(50)).await;
        rpc.set_account(a, 11);
        assert_eq!(cache.get_account_info(&a).await.unwrap().unwrap().lamports, 10);
        assert_eq!(rpc.calls(GET_ACCOUNT_INFO), 1);

        advance(Duration::from_millis(100)).await;
        assert_eq!(cache.get_account_info(&a).await.unwrap().unwrap().lamports, 11);
        assert_eq!(rpc.calls(GET_ACCOUNT_INFO), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_keep_context_slot() {
        let (rpc, _, cache) = setup(short_ttls());
        let a = Pubkey::new_unique();
        rpc.set_account(a, 1);
        rpc.set_slot(77);

        cache.get_account_info(&a).await.unwrap();
        assert_eq!(cache.account_entry(&a).unwrap().slot, Some(77));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_account_is_none_and_not_cached() {
        let (rpc, optimizations, cache) = setup(short_ttls());
        let a = Pubkey::new_unique();

        assert!(cache.get_account_info(&a).await.unwrap().is_none());
        assert!(cache.account_entry(&a).is_none());
        assert_eq!(optimizations.status().errors_in_window, 0);

        rpc.set_account(a, 5);
        assert!(cache.get_account_info(&a).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_account_is_none_on_direct_path() {
        let (rpc, optimizations, cache) = setup(OptimizationConfig {
            max_errors_per_minute: 2,
            ..short_ttls()
        });
        let a = Pubkey::new_unique();

        optimizations.update_config(&ConfigUpdate {
            account_caching: Some(false),
            ..Default::default()
        });
        assert!(cache.get_account_info(&a).await.unwrap().is_none());

        optimizations.update_config(&ConfigUpdate {
            account_caching: Some(true),
            ..Default::default()
        });
        for _ in 0..2 {
            optimizations.report_error(&RpcError::Transient("503".to_owned()));
        }
        assert!(optimizations.is_tripped());
        assert!(cache.get_account_info(&a).await.unwrap().is_none());
        assert_eq!(rpc.calls(GET_ACCOUNT_INFO), 2);
        // a missing account is not an upstream failure
        assert_eq!(optimizations.status().errors_in_window, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_serving_follows_fallback_mode() {
        let (rpc, optimizations, cache) = setup(OptimizationConfig {
            enable_fallback_mode: false,
            ..short_ttls()
        });
        let a = Pubkey::new_unique();
        rpc.set_account(a, 10);
        cache.get_account_info(&a).await.unwrap();
        advance(Duration::from_millis(150)).await;

        rpc.fail_next(GET_ACCOUNT_INFO, RpcError::Transient("timeout".to_owned()));
        assert!(matches!(
            cache.get_account_info(&a).await,
            Err(RpcError::Transient(_))
        ));

        optimizations.update_config(&ConfigUpdate {
            enable_fallback_mode: Some(true),
            ..Default::default()
        });
        rpc.fail_next(GET_ACCOUNT_INFO, RpcError::Transient("timeout".to_owned()));
        let stale = cache.get_account_info(&a).await.unwrap().unwrap();
        assert_eq!(stale.lamports, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_reads_are_recorded() {
        let hits = || metrics::cache_requests(ACCOUNTS, CacheResult::Hit);
        let misses = || metrics::cache_requests(ACCOUNTS, CacheResult::Miss);
        let (rpc, _, cache) = setup(short_ttls());
        let (a, b) = (Pubkey::new_unique(), Pubkey::new_unique());
        rpc.set_account(a, 1);
        rpc.set_account(b, 2);
        cache.get_account_info(&a).await.unwrap();

        let (hits_before, misses_before) = (hits(), misses());
        cache.get_multiple_accounts_info(&[a, b]).await.unwrap();
        assert!(hits() > hits_before);
        assert!(misses() > misses_before);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_token_account_is_cached_zero() {
        let (rpc, _, cache) = setup(short_ttls());
        let a = Pubkey::new_unique();

        assert_eq!(cache.get_token_balance(&a).await.unwrap(), 0.0);
        assert_eq!(cache.get_token_balance(&a).await.unwrap(), 0.0);
        assert_eq!(rpc.calls(GET_TOKEN_ACCOUNT_BALANCE), 1);
        assert_eq!(cache.balance_entry(&a).unwrap().value, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_balance_is_served_and_error_reported() {
        let (rpc, optimizations, cache) = setup(short_ttls());
        let a = Pubkey::new_unique();
        rpc.set_token_balance(a, 42.5);
        cache.get_token_balance(&a).await.unwrap();

        advance(Duration::from_millis(150)).await;
        rpc.fail_next(GET_TOKEN_ACCOUNT_BALANCE, RpcError::Transient("timeout".to_owned()));
        assert_eq!(cache.get_token_balance(&a).await.unwrap(), 42.5);
        assert_eq!(optimizations.status().errors_in_window, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_reads_use_one_call() {
        let (rpc, _, cache) = setup(short_ttls());
        let (a, b, c) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        rpc.set_account(a, 1);
        rpc.set_account(c, 3);
        cache.get_account_info(&a).await.unwrap();

        let accounts = cache.get_multiple_accounts_info(&[a, b, c]).await.unwrap();
        let lamports: Vec<_> = accounts.iter().map(|a| a.as_ref().map(|a| a.lamports)).collect();
        assert_eq!(lamports, vec![Some(1), None, Some(3)]);
        assert_eq!(rpc.calls(GET_MULTIPLE_ACCOUNTS), 1);
        assert_eq!(rpc.calls(GET_ACCOUNT_INFO), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_queries_off_fetches_per_key() {
        let (rpc, optimizations, cache) = setup(short_ttls());
        optimizations.update_config(&ConfigUpdate {
            batch_queries: Some(false),
            ..Default::default()
        });
        let (a, b) = (Pubkey::new_unique(), Pubkey::new_unique());
        rpc.set_account(a, 1);

        let accounts = cache.get_multiple_accounts_info(&[a, b]).await.unwrap();
        assert!(accounts[0].is_some() && accounts[1].is_none());
        assert_eq!(rpc.calls(GET_MULTIPLE_ACCOUNTS), 0);
        assert_eq!(rpc.calls(GET_ACCOUNT_INFO), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tripped_breaker_bypasses_cache() {
        let (rpc, optimizations, cache) = setup(OptimizationConfig {
            max_errors_per_minute: 5,
            ..short_ttls()
        });
        let a = Pubkey::new_unique();
        rpc.set_account(a, 1);
        cache.get_account_info(&a).await.unwrap();

        rpc.fail_always(GET_ACCOUNT_INFO, Some(RpcError::Transient("503".to_owned())));
        let b = Pubkey::new_unique();
        for _ in 0..6 {
            advance(Duration::from_secs(1)).await;
            assert!(cache.get_account_info(&b).await.is_err());
        }
        assert!(optimizations.is_tripped());

        rpc.fail_always(GET_ACCOUNT_INFO, None);
        let before = rpc.calls(GET_ACCOUNT_INFO);
        cache.get_account_info(&a).await.unwrap();
        cache.get_account_info(&a).await.unwrap();
        assert_eq!(rpc.calls(GET_ACCOUNT_INFO), before + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_cache() {
        let (_, optimizations, cache) = setup(OptimizationConfig::default());
        let uri = "https://arweave.net/token.json";
        let doc = serde_json::json!({"name": "Launch", "symbol": "LCH"});

        let value = cache.get_metadata(uri, || async { Ok(doc.clone()) }).await.unwrap();
        assert_eq!(value, doc);
        let value = cache
            .get_metadata(uri, || async { Err(RpcError::Request("unreachable".to_owned())) })
            .await
            .unwrap();
        assert_eq!(value, doc);

        optimizations.update_config(&ConfigUpdate {
            metadata_caching: Some(false),
            ..Default::default()
        });
        let fresh = serde_json::json!({"name": "Relaunch"});
        let value = cache.get_metadata(uri, || async { Ok(fresh.clone()) }).await.unwrap();
        assert_eq!(value, fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_drops_account_and_balance() {
        let (rpc, _, cache) = setup(short_ttls());
        let a = Pubkey::new_unique();
        rpc.set_account(a, 1);
        rpc.set_token_balance(a, 1.0);
        cache.get_account_info(&a).await.unwrap();
        cache.get_token_balance(&a).await.unwrap();

        assert_eq!(cache.invalidate(&a), 2);
        assert_eq!(cache.sizes(), CacheSizes::default());
    }
}
