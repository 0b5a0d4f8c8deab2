use {
    crate::{account_cache::AccountCache, blockhash::BlockhashProvider, metrics},
    solana_sdk::pubkey::Pubkey,
    std::{
        mem,
        sync::{Arc, Mutex},
        time::Duration,
    },
    tokio::{
        task::{AbortHandle, JoinSet},
        time::sleep,
    },
    tracing::{debug, info},
};

pub const DEFAULT_INVALIDATION_DELAY: Duration = Duration::from_millis(500);

/// Handle to a scheduled clear. Dropping it does not cancel the clear.
#[derive(Debug)]
pub struct DelayedInvalidation {
    handle: AbortHandle,
}

impl DelayedInvalidation {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

///
/// Clears cached state for accounts written by a completed transaction.
///
pub struct InvalidationCoordinator {
    accounts: Arc<AccountCache>,
    blockhash: Arc<BlockhashProvider>,
    scheduled: Mutex<JoinSet<()>>,
}

impl InvalidationCoordinator {
    pub fn new(accounts: Arc<AccountCache>, blockhash: Arc<BlockhashProvider>) -> Self {
        Self {
            accounts,
            blockhash,
            scheduled: Mutex::new(JoinSet::new()),
        }
    }

    /// Deletes the cached account and balance of exactly `addresses`.
    pub fn clear(&self, addresses: &[Pubkey]) -> usize {
        let removed = clear_accounts(&self.accounts, addresses);
        debug!(accounts = addresses.len(), removed, "cache entries invalidated");
        removed
    }

    ///
    /// Runs [`Self::clear`] for `addresses` once `delay` has elapsed.
    ///
    /// Must be called from within a tokio runtime. Pending clears are aborted by
    /// [`Self::shutdown`].
    ///
    pub fn clear_with_delay(&self, addresses: Vec<Pubkey>, delay: Duration) -> DelayedInvalidation {
        let accounts = Arc::clone(&self.accounts);
        let mut scheduled = self.scheduled.lock().expect("invalidation lock poisoned");
        while scheduled.try_join_next().is_some() {}
        let handle = scheduled.spawn(async move {
            sleep(delay).await;
            let removed = clear_accounts(&accounts, &addresses);
            debug!(accounts = addresses.len(), removed, "delayed cache invalidation done");
        });
        DelayedInvalidation { handle }
    }

    /// Drops every cached account, balance, metadata document and the blockhash.
    pub fn clear_all(&self) -> usize {
        let removed = self.accounts.invalidate_all() + usize::from(self.blockhash.invalidate());
        metrics::cache_invalidation("all", removed);
        info!(removed, "all caches cleared");
        removed
    }

    pub fn pending(&self) -> usize {
        let mut scheduled = self.scheduled.lock().expect("invalidation lock poisoned");
        while scheduled.try_join_next().is_some() {}
        scheduled.len()
    }

    /// Aborts every pending delayed clear and waits for the tasks to stop.
    pub async fn shutdown(&self) {
        let mut scheduled = mem::take(&mut *self.scheduled.lock().expect("invalidation lock poisoned"));
        if !scheduled.is_empty() {
            debug!(pending = scheduled.len(), "aborting delayed invalidations");
        }
        scheduled.shutdown().await;
    }
}

fn clear_accounts(accounts: &AccountCache, addresses: &[Pubkey]) -> usize {
    let removed: usize = addresses
        .iter()
        .map(|address| accounts.invalidate(address))
        .sum();
    metrics::cache_invalidation("accounts", removed);
    removed
}
