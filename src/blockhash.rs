use {
    crate::{
        metrics::{self, CacheResult},
        optimization::{Feature, OptimizationManager},
        solana_rpc::{LatestBlockhash, RpcError, SharedChainRpc},
    },
    std::sync::{Arc, RwLock},
    tokio::{sync::Mutex, time::Instant},
    tracing::debug,
};

const CACHE_NAME: &str = "blockhash";

#[derive(Debug, Clone, Copy)]
pub struct CachedBlockhash {
    pub latest: LatestBlockhash,
    pub fetched_at: Instant,
}

///
/// Hands out the latest blockhash, reusing it while younger than
/// `blockhash_cache_ttl`. Concurrent callers that find it expired share a
/// single refresh.
///
pub struct BlockhashProvider {
    rpc: SharedChainRpc,
    optimizations: Arc<OptimizationManager>,
    cached: RwLock<Option<CachedBlockhash>>,
    refresh: Mutex<()>,
}

impl BlockhashProvider {
    pub fn new(rpc: SharedChainRpc, optimizations: Arc<OptimizationManager>) -> Self {
        Self {
            rpc,
            optimizations,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub async fn get(&self) -> Result<LatestBlockhash, RpcError> {
        if !self.optimizations.should_use(Feature::BlockhashReuse) {
            metrics::cache_request(CACHE_NAME, CacheResult::Bypass);
            return self.fetch().await;
        }

        if let Some(latest) = self.fresh() {
            metrics::cache_request(CACHE_NAME, CacheResult::Hit);
            return Ok(latest);
        }

        let _guard = self.refresh.lock().await;
        // another caller may have refreshed while we waited
        if let Some(latest) = self.fresh() {
            metrics::cache_request(CACHE_NAME, CacheResult::Hit);
            return Ok(latest);
        }

        metrics::cache_request(CACHE_NAME, CacheResult::Miss);
        let latest = self.fetch().await?;
        *self.cached.write().expect("blockhash lock poisoned") = Some(CachedBlockhash {
            latest,
            fetched_at: Instant::now(),
        });
        debug!(
            blockhash = %latest.blockhash,
            last_valid_block_height = latest.last_valid_block_height,
            "blockhash refreshed"
        );
        Ok(latest)
    }

    pub fn cached(&self) -> Option<CachedBlockhash> {
        *self.cached.read().expect("blockhash lock poisoned")
    }

    pub fn invalidate(&self) -> bool {
        self.cached
            .write()
            .expect("blockhash lock poisoned")
            .take()
            .is_some()
    }

    fn fresh(&self) -> Option<LatestBlockhash> {
        let ttl = self.optimizations.ttl(Feature::BlockhashReuse);
        self.cached()
            .filter(|cached| cached.fetched_at.elapsed() < ttl)
            .map(|cached| cached.latest)
    }

    async fn fetch(&self) -> Result<LatestBlockhash, RpcError> {
        metrics::blockhash_fetch_inc();
        self.rpc.get_latest_blockhash().await.map_err(|error| {
            self.optimizations.report_error(&error);
            error
        })
    }
}
