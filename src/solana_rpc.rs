use {
    crate::{metrics, util::CommitmentLevel},
    solana_client::{
        client_error::{ClientError, ClientErrorKind},
        nonblocking::rpc_client::RpcClient,
        rpc_request::RpcError as SolanaRpcError,
    },
    solana_rpc_client_api::config::{
        RpcSendTransactionConfig, RpcSimulateTransactionConfig, RpcTransactionConfig,
    },
    solana_sdk::{
        account::Account,
        clock::Slot,
        commitment_config::CommitmentConfig,
        hash::Hash,
        pubkey::Pubkey,
        signature::Signature,
        transaction::{Transaction, TransactionError},
    },
    solana_transaction_status::{option_serializer::OptionSerializer, UiTransactionEncoding},
    std::{sync::Arc, time::Duration},
    thiserror::Error,
    tokio::time::sleep,
    tracing::debug,
};

pub type SharedChainRpc = Arc<dyn ChainRpc + Send + Sync + 'static>;

#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("transient rpc failure: {0}")]
    Transient(String),

    #[error("rpc request failed: {0}")]
    Request(String),

    #[error("This transaction has already been processed")]
    AlreadyProcessed,

    #[error("blockhash expired: block height {block_height} exceeded {last_valid_block_height}")]
    BlockhashExpired {
        block_height: u64,
        last_valid_block_height: u64,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RpcError {
    pub const fn is_account_not_found(&self) -> bool {
        matches!(self, Self::AccountNotFound(_))
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Validation failures are rejected before they reach the node.
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    pub fn is_already_processed(&self) -> bool {
        match self {
            Self::AlreadyProcessed => true,
            Self::Request(message) | Self::Transient(message) => is_already_processed_text(message),
            _ => false,
        }
    }
}

pub fn is_already_processed_text(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already processed") || message.contains("already been processed")
}

fn is_account_not_found_text(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("could not find account") || message.contains("accountnotfound")
}

pub fn parse_address(address: &str) -> Result<Pubkey, RpcError> {
    address
        .parse()
        .map_err(|error| RpcError::InvalidInput(format!("invalid account address {address:?}: {error}")))
}

pub trait SolanaRpcErrorKindExt {
    fn my_error_kind(&self) -> &ClientErrorKind;

    /// Returns true if the error is transient and the operation can be retried.
    fn is_transient(&self) -> bool {
        match self.my_error_kind() {
            ClientErrorKind::Io(_) => true,
            ClientErrorKind::Reqwest(error) => {
                if let Some(status) = error.status() {
                    status.is_server_error() || status.as_u16() == 429
                } else {
                    tracing::warn!("Reqwest error without status: {:?}", error);
                    true
                }
            }
            ClientErrorKind::RpcError(rpc_error) => {
                !matches!(rpc_error, SolanaRpcError::ForUser(_))
            }
            _ => false,
        }
    }

    fn is_already_processed(&self) -> bool {
        match self.my_error_kind() {
            ClientErrorKind::TransactionError(TransactionError::AlreadyProcessed) => true,
            kind => is_already_processed_text(&kind.to_string()),
        }
    }

    fn is_account_not_found(&self) -> bool {
        match self.my_error_kind() {
            ClientErrorKind::TransactionError(TransactionError::AccountNotFound) => true,
            kind => is_account_not_found_text(&kind.to_string()),
        }
    }
}

impl SolanaRpcErrorKindExt for ClientError {
    fn my_error_kind(&self) -> &ClientErrorKind {
        self.kind()
    }
}

impl RpcError {
    fn from_client(error: ClientError, address: Option<&Pubkey>) -> Self {
        if error.is_already_processed() {
            Self::AlreadyProcessed
        } else if error.is_account_not_found() {
            Self::AccountNotFound(address.map(ToString::to_string).unwrap_or_default())
        } else if SolanaRpcErrorKindExt::is_transient(&error) {
            Self::Transient(error.to_string())
        } else {
            Self::Request(error.to_string())
        }
    }
}

impl From<ClientError> for RpcError {
    fn from(error: ClientError) -> Self {
        Self::from_client(error, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationResult {
    pub err: Option<String>,
    pub logs: Vec<String>,
}

///
/// The blockchain node as seen by the resilient RPC layer.
///
#[async_trait::async_trait]
pub trait ChainRpc {
    async fn get_account_info(&self, address: &Pubkey) -> Result<(Option<Account>, Slot), RpcError>;

    async fn get_multiple_accounts_info(
        &self,
        addresses: &[Pubkey],
    ) -> Result<(Vec<Option<Account>>, Slot), RpcError>;

    /// UI amount of an SPL token account.
    async fn get_token_account_balance(&self, address: &Pubkey) -> Result<(f64, Slot), RpcError>;

    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError>;

    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SimulationResult, RpcError>;

    /// Sends a signed transaction without preflight.
    async fn send_raw_transaction(&self, transaction: &Transaction) -> Result<Signature, RpcError>;

    ///
    /// Waits for `signature` to reach the configured commitment, giving up once the
    /// chain passes `last_valid_block_height`.
    ///
    /// Returns the on-chain error if the transaction landed but failed.
    ///
    async fn confirm_transaction(
        &self,
        signature: &Signature,
        blockhash: &LatestBlockhash,
    ) -> Result<Option<String>, RpcError>;

    async fn get_transaction_logs(&self, signature: &Signature) -> Result<Vec<String>, RpcError>;
}

///
/// [`ChainRpc`] backed by the Solana JSON-RPC client.
///
pub struct SolanaRpc {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
    confirm_poll_interval: Duration,
}

impl SolanaRpc {
    pub fn new(client: Arc<RpcClient>, commitment: CommitmentLevel, confirm_poll_interval: Duration) -> Self {
        Self {
            client,
            commitment: commitment.into(),
            confirm_poll_interval,
        }
    }

    pub fn from_url(url: String, timeout: Duration, commitment: CommitmentLevel, confirm_poll_interval: Duration) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(url, timeout, commitment.into());
        Self::new(Arc::new(client), commitment, confirm_poll_interval)
    }
}

fn track<T>(method: &'static str, result: Result<T, RpcError>) -> Result<T, RpcError> {
    if let Err(error) = &result {
        metrics::rpc_error(method);
        debug!(method, error = %error, "rpc call failed");
    }
    result
}

#[async_trait::async_trait]
impl ChainRpc for SolanaRpc {
    async fn get_account_info(&self, address: &Pubkey) -> Result<(Option<Account>, Slot), RpcError> {
        let result = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map(|response| (response.value, response.context.slot))
            .map_err(|error| RpcError::from_client(error, Some(address)));
        track("getAccountInfo", result)
    }

    async fn get_multiple_accounts_info(
        &self,
        addresses: &[Pubkey],
    ) -> Result<(Vec<Option<Account>>, Slot), RpcError> {
        let result = self
            .client
            .get_multiple_accounts_with_commitment(addresses, self.commitment)
            .await
            .map(|response| (response.value, response.context.slot))
            .map_err(RpcError::from);
        track("getMultipleAccounts", result)
    }

    async fn get_token_account_balance(&self, address: &Pubkey) -> Result<(f64, Slot), RpcError> {
        let result = self
            .client
            .get_token_account_balance_with_commitment(address, self.commitment)
            .await
            .map(|response| (response.value.ui_amount.unwrap_or_default(), response.context.slot))
            .map_err(|error| RpcError::from_client(error, Some(address)));
        track("getTokenAccountBalance", result)
    }

    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        let result = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map(|(blockhash, last_valid_block_height)| LatestBlockhash {
                blockhash,
                last_valid_block_height,
            })
            .map_err(RpcError::from);
        track("getLatestBlockhash", result)
    }

    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SimulationResult, RpcError> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            commitment: Some(self.commitment),
            ..Default::default()
        };
        let result = self
            .client
            .simulate_transaction_with_config(transaction, config)
            .await
            .map(|response| SimulationResult {
                err: response.value.err.map(|error| error.to_string()),
                logs: response.value.logs.unwrap_or_default(),
            })
            .map_err(RpcError::from);
        track("simulateTransaction", result)
    }

    async fn send_raw_transaction(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(0),
            ..Default::default()
        };
        let result = self
            .client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(RpcError::from);
        track("sendTransaction", result)
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        blockhash: &LatestBlockhash,
    ) -> Result<Option<String>, RpcError> {
        loop {
            let statuses = self
                .client
                .get_signature_statuses(&[*signature])
                .await
                .map_err(RpcError::from);
            let status = track("getSignatureStatuses", statuses)?.value.into_iter().next().flatten();

            if let Some(status) = status {
                if let Some(error) = status.err {
                    return Ok(Some(error.to_string()));
                }
                if status.satisfies_commitment(self.commitment) {
                    return Ok(None);
                }
            }

            let block_height = self
                .client
                .get_block_height_with_commitment(self.commitment)
                .await
                .map_err(RpcError::from);
            let block_height = track("getBlockHeight", block_height)?;
            if block_height > blockhash.last_valid_block_height {
                return Err(RpcError::BlockhashExpired {
                    block_height,
                    last_valid_block_height: blockhash.last_valid_block_height,
                });
            }

            sleep(self.confirm_poll_interval).await;
        }
    }

    async fn get_transaction_logs(&self, signature: &Signature) -> Result<Vec<String>, RpcError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let result = self
            .client
            .get_transaction_with_config(signature, config)
            .await
            .map(|transaction| {
                match transaction.transaction.meta.map(|meta| meta.log_messages) {
                    Some(OptionSerializer::Some(logs)) => logs,
                    _ => Vec::new(),
                }
            })
            .map_err(RpcError::from);
        track("getTransaction", result)
    }
}

pub mod testkit {
    //! Scripted [`ChainRpc`] with per-method call counters and failure injection.

    use {
        super::{ChainRpc, LatestBlockhash, RpcError, SimulationResult},
        solana_sdk::{
            account::Account, clock::Slot, hash::Hash, pubkey::Pubkey, signature::Signature,
            transaction::Transaction,
        },
        std::{
            collections::{HashMap, VecDeque},
            sync::Mutex,
        },
    };

    pub const GET_ACCOUNT_INFO: &str = "getAccountInfo";
    pub const GET_MULTIPLE_ACCOUNTS: &str = "getMultipleAccounts";
    pub const GET_TOKEN_ACCOUNT_BALANCE: &str = "getTokenAccountBalance";
    pub const GET_LATEST_BLOCKHASH: &str = "getLatestBlockhash";
    pub const SIMULATE_TRANSACTION: &str = "simulateTransaction";
    pub const SEND_TRANSACTION: &str = "sendTransaction";
    pub const CONFIRM_TRANSACTION: &str = "confirmTransaction";
    pub const GET_TRANSACTION: &str = "getTransaction";

    #[derive(Default)]
    struct MockChainRpcInner {
        slot: Slot,
        accounts: HashMap<Pubkey, Account>,
        token_balances: HashMap<Pubkey, f64>,
        blockhash_seq: u64,
        simulation: SimulationResult,
        confirmation_error: Option<String>,
        transaction_logs: Vec<String>,
        failures: HashMap<&'static str, VecDeque<RpcError>>,
        sticky_failures: HashMap<&'static str, RpcError>,
        calls: HashMap<&'static str, u64>,
        sent: Vec<Transaction>,
    }

    #[derive(Default)]
    pub struct MockChainRpc {
        inner: Mutex<MockChainRpcInner>,
    }

    impl MockChainRpc {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_account(&self, address: Pubkey, lamports: u64) {
            let account = Account {
                lamports,
                ..Account::default()
            };
            self.lock().accounts.insert(address, account);
        }

        pub fn remove_account(&self, address: &Pubkey) {
            self.lock().accounts.remove(address);
        }

        pub fn set_token_balance(&self, address: Pubkey, ui_amount: f64) {
            self.lock().token_balances.insert(address, ui_amount);
        }

        pub fn set_slot(&self, slot: Slot) {
            self.lock().slot = slot;
        }

        pub fn set_simulation(&self, simulation: SimulationResult) {
            self.lock().simulation = simulation;
        }

        pub fn set_confirmation_error(&self, error: Option<String>) {
            self.lock().confirmation_error = error;
        }

        pub fn set_transaction_logs(&self, logs: Vec<String>) {
            self.lock().transaction_logs = logs;
        }

        /// Fails the next call to `method` with `error`.
        pub fn fail_next(&self, method: &'static str, error: RpcError) {
            self.lock().failures.entry(method).or_default().push_back(error);
        }

        /// Fails every call to `method` until cleared with `None`.
        pub fn fail_always(&self, method: &'static str, error: Option<RpcError>) {
            let mut inner = self.lock();
            match error {
                Some(error) => inner.sticky_failures.insert(method, error),
                None => inner.sticky_failures.remove(method),
            };
        }

        pub fn calls(&self, method: &str) -> u64 {
            self.lock().calls.get(method).copied().unwrap_or(0)
        }

        pub fn sent_transactions(&self) -> Vec<Transaction> {
            self.lock().sent.clone()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, MockChainRpcInner> {
            self.inner.lock().expect("poisoned")
        }

        fn enter(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, MockChainRpcInner>, RpcError> {
            let mut inner = self.lock();
            *inner.calls.entry(method).or_insert(0) += 1;
            if let Some(error) = inner.failures.get_mut(method).and_then(VecDeque::pop_front) {
                return Err(error);
            }
            if let Some(error) = inner.sticky_failures.get(method) {
                return Err(error.clone());
            }
            Ok(inner)
        }
    }

    #[async_trait::async_trait]
    impl ChainRpc for MockChainRpc {
        async fn get_account_info(&self, address: &Pubkey) -> Result<(Option<Account>, Slot), RpcError> {
            let inner = self.enter(GET_ACCOUNT_INFO)?;
            Ok((inner.accounts.get(address).cloned(), inner.slot))
        }

        async fn get_multiple_accounts_info(
            &self,
            addresses: &[Pubkey],
        ) -> Result<(Vec<Option<Account>>, Slot), RpcError> {
            let inner = self.enter(GET_MULTIPLE_ACCOUNTS)?;
            let accounts = addresses
                .iter()
                .map(|address| inner.accounts.get(address).cloned())
                .collect();
            Ok((accounts, inner.slot))
        }

        async fn get_token_account_balance(&self, address: &Pubkey) -> Result<(f64, Slot), RpcError> {
            let inner = self.enter(GET_TOKEN_ACCOUNT_BALANCE)?;
            inner
                .token_balances
                .get(address)
                .map(|balance| (*balance, inner.slot))
                .ok_or_else(|| RpcError::AccountNotFound(address.to_string()))
        }

        async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
            let mut inner = self.enter(GET_LATEST_BLOCKHASH)?;
            inner.blockhash_seq += 1;
            Ok(LatestBlockhash {
                blockhash: Hash::new_from_array([inner.blockhash_seq as u8; 32]),
                last_valid_block_height: 150 + inner.blockhash_seq,
            })
        }

        async fn simulate_transaction(&self, _transaction: &Transaction) -> Result<SimulationResult, RpcError> {
            let inner = self.enter(SIMULATE_TRANSACTION)?;
            Ok(inner.simulation.clone())
        }

        async fn send_raw_transaction(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
            let mut inner = self.enter(SEND_TRANSACTION)?;
            inner.sent.push(transaction.clone());
            Ok(transaction.signatures.first().copied().unwrap_or_default())
        }

        async fn confirm_transaction(
            &self,
            _signature: &Signature,
            _blockhash: &LatestBlockhash,
        ) -> Result<Option<String>, RpcError> {
            let inner = self.enter(CONFIRM_TRANSACTION)?;
            Ok(inner.confirmation_error.clone())
        }

        async fn get_transaction_logs(&self, _signature: &Signature) -> Result<Vec<String>, RpcError> {
            let inner = self.enter(GET_TRANSACTION)?;
            Ok(inner.transaction_logs.clone())
        }
    }
}
