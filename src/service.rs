use {
    crate::{
        account_cache::{AccountCache, CacheSizes},
        blockhash::BlockhashProvider,
        invalidation::InvalidationCoordinator,
        lease::SharedLeaseStore,
        optimization::{
            ConfigError, ConfigUpdate, OptimizationConfig, OptimizationManager,
            OptimizationStatus, Preset,
        },
        signer::TransactionSigner,
        solana_rpc::{LatestBlockhash, RpcError, SharedChainRpc},
        submitter::{SubmissionOutcome, SubmitRequest, SubmitterConfig, TransactionSubmitter},
    },
    serde::{Deserialize, Serialize},
    solana_sdk::{account::Account, pubkey::Pubkey},
    std::{future::Future, sync::Arc},
    tracing::info,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub optimizations: OptimizationStatus,
    pub caches: CacheSizes,
    pub blockhash_cached: bool,
    pub pending_invalidations: usize,
}

///
/// Entry point for UI and business callers. Owns every component of the
/// resilient RPC layer; build it once at startup and share it behind an `Arc`.
///
pub struct LaunchpadRpc {
    optimizations: Arc<OptimizationManager>,
    accounts: Arc<AccountCache>,
    blockhash: Arc<BlockhashProvider>,
    invalidation: Arc<InvalidationCoordinator>,
    submitter: TransactionSubmitter,
}

impl LaunchpadRpc {
    pub fn new(
        rpc: SharedChainRpc,
        lease: SharedLeaseStore,
        base: OptimizationConfig,
        submitter_config: SubmitterConfig,
    ) -> Self {
        let optimizations = Arc::new(OptimizationManager::new(base));
        let accounts = Arc::new(AccountCache::new(Arc::clone(&rpc), Arc::clone(&optimizations)));
        let blockhash = Arc::new(BlockhashProvider::new(Arc::clone(&rpc), Arc::clone(&optimizations)));
        let invalidation = Arc::new(InvalidationCoordinator::new(
            Arc::clone(&accounts),
            Arc::clone(&blockhash),
        ));
        let submitter = TransactionSubmitter::new(
            rpc,
            Arc::clone(&blockhash),
            lease,
            Arc::clone(&invalidation),
            Arc::clone(&optimizations),
            submitter_config,
        );
        Self {
            optimizations,
            accounts,
            blockhash,
            invalidation,
            submitter,
        }
    }

    pub const fn optimizations(&self) -> &Arc<OptimizationManager> {
        &self.optimizations
    }

    pub const fn accounts(&self) -> &Arc<AccountCache> {
        &self.accounts
    }

    pub const fn invalidation(&self) -> &Arc<InvalidationCoordinator> {
        &self.invalidation
    }

    pub async fn get_account_info(&self, address: &Pubkey) -> Result<Option<Account>, RpcError> {
        self.accounts.get_account_info(address).await
    }

    pub async fn get_multiple_accounts_info(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, RpcError> {
        self.accounts.get_multiple_accounts_info(addresses).await
    }

    pub async fn get_token_balance(&self, address: &Pubkey) -> Result<f64, RpcError> {
        self.accounts.get_token_balance(address).await
    }

    pub async fn get_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        self.blockhash.get().await
    }

    pub async fn get_metadata<F, Fut>(&self, uri: &str, fetcher: F) -> Result<serde_json::Value, RpcError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, RpcError>>,
    {
        self.accounts.get_metadata(uri, fetcher).await
    }

    pub async fn submit_transaction(
        &self,
        signer: &(dyn TransactionSigner + Send + Sync),
        request: SubmitRequest,
    ) -> SubmissionOutcome {
        self.submitter.submit_transaction(signer, request).await
    }

    /// Applies `update`; turning any optimization off also drops every cached value.
    pub fn update_config(&self, update: &ConfigUpdate) -> Arc<OptimizationConfig> {
        let disables = update.disables_any(&self.optimizations.config());
        let config = self.optimizations.update_config(update);
        if disables {
            self.invalidation.clear_all();
        }
        config
    }

    pub fn apply_preset(&self, name: &str) -> Result<Arc<OptimizationConfig>, ConfigError> {
        let preset: Preset = name.parse()?;
        let disables = preset.update().disables_any(&self.optimizations.config());
        let config = self.optimizations.apply_preset(preset.as_str())?;
        if disables {
            self.invalidation.clear_all();
        }
        Ok(config)
    }

    pub fn clear_all_caches(&self) -> usize {
        self.invalidation.clear_all()
    }

    /// Re-arms the breaker. Entries cached before the trip are dropped as well.
    pub fn rearm(&self) {
        self.optimizations.rearm();
        self.invalidation.clear_all();
    }

    pub fn get_status(&self) -> ServiceStatus {
        ServiceStatus {
            optimizations: self.optimizations.status(),
            caches: self.accounts.sizes(),
            blockhash_cached: self.blockhash.cached().is_some(),
            pending_invalidations: self.invalidation.pending(),
        }
    }

    /// Cancels pending delayed invalidations and empties every cache.
    pub async fn dispose(&self) {
        self.invalidation.shutdown().await;
        self.invalidation.clear_all();
        info!("launchpad rpc disposed");
    }
}
