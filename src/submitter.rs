use {
    crate::{
        blockhash::BlockhashProvider,
        invalidation::{InvalidationCoordinator, DEFAULT_INVALIDATION_DELAY},
        lease::{LeaseError, LeaseGuard, SharedLeaseStore, DEFAULT_LEASE_EXPIRY},
        metrics,
        optimization::OptimizationManager,
        signer::{SignError, TransactionSigner},
        solana_rpc::{is_already_processed_text, LatestBlockhash, RpcError, SharedChainRpc},
        util::ms_since_epoch,
    },
    serde::{Deserialize, Serialize},
    solana_sdk::{
        instruction::Instruction, message::Message, pubkey::Pubkey, signature::Signature,
        transaction::Transaction,
    },
    std::{collections::BTreeSet, sync::Arc, time::Duration},
    thiserror::Error,
    tracing::{info, warn},
};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("previous transaction still processing")]
    LeaseHeld,

    #[error("failed to fetch recent blockhash: {0}")]
    Blockhash(RpcError),

    #[error("transaction signing failed: {0}")]
    Signing(#[from] SignError),

    #[error("transaction simulation failed: {0}")]
    Simulation(String),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("failed to send transaction: {0}")]
    Send(RpcError),

    #[error("transaction failed: {0}")]
    Confirmation(String),
}

impl SubmitError {
    pub const fn step(&self) -> &'static str {
        match self {
            Self::LeaseHeld => "lease_check",
            Self::Blockhash(_) => "blockhash",
            Self::Signing(_) => "sign",
            Self::Simulation(_) => "simulate",
            Self::Lease(_) => "lease",
            Self::Send(_) => "send",
            Self::Confirmation(_) => "confirm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitterConfig {
    #[serde(with = "humantime_serde")]
    pub lease_expiry: Duration,
    #[serde(with = "humantime_serde")]
    pub invalidation_delay: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            lease_expiry: DEFAULT_LEASE_EXPIRY,
            invalidation_delay: DEFAULT_INVALIDATION_DELAY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub instructions: Vec<Instruction>,
    pub success_message: String,
    /// Echoed back to the caller on success.
    pub data: Option<serde_json::Value>,
    /// Accounts to invalidate on success besides the writable ones of `instructions`.
    pub touched: Vec<Pubkey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// The node reported the transaction as already processed; it most likely landed.
    #[serde(default)]
    pub already_processed: bool,
}

impl SubmissionOutcome {
    fn failed(error: &SubmitError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            signature: None,
            data: None,
            already_processed: false,
        }
    }
}

enum Landed {
    Confirmed,
    AlreadyProcessed,
}

///
/// Turns program logs into a message for the end user, falling back to the raw
/// node error.
///
pub fn extract_error_message(logs: &[String], fallback: &str) -> String {
    if let Some(message) = logs
        .iter()
        .find_map(|log| log.split_once("Error Message: ").map(|(_, message)| message))
    {
        return message.trim().trim_end_matches('.').to_owned();
    }

    let custom_code = logs
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(fallback))
        .find_map(|line| line.split_once("custom program error: 0x"))
        .and_then(|(_, code)| {
            let code = code.split(|c: char| !c.is_ascii_hexdigit()).next()?;
            u32::from_str_radix(code, 16).ok()
        });
    if let Some(code) = custom_code {
        return format!("Program error {code} (0x{code:x})");
    }

    let insufficient = |line: &str| {
        let line = line.to_ascii_lowercase();
        line.contains("insufficient funds") || line.contains("insufficient lamports")
    };
    if logs.iter().any(|log| insufficient(log.as_str())) || insufficient(fallback) {
        return "Insufficient funds for this transaction".to_owned();
    }

    fallback.to_owned()
}

/// Accounts the transaction may write: writable instruction accounts, the fee payer and `extra`.
pub fn touched_accounts(instructions: &[Instruction], payer: &Pubkey, extra: &[Pubkey]) -> Vec<Pubkey> {
    let mut touched = BTreeSet::from([*payer]);
    touched.extend(
        instructions
            .iter()
            .flat_map(|instruction| instruction.accounts.iter())
            .filter(|meta| meta.is_writable)
            .map(|meta| meta.pubkey),
    );
    touched.extend(extra.iter().copied());
    touched.into_iter().collect()
}

///
/// Runs the submission protocol: lease check, blockhash, sign, simulate, lease
/// acquire, send, confirm, lease release, and invalidation of touched accounts
/// on success.
///
/// Failed transactions are reported back, never retried.
///
pub struct TransactionSubmitter {
    rpc: SharedChainRpc,
    blockhash: Arc<BlockhashProvider>,
    lease: SharedLeaseStore,
    invalidation: Arc<InvalidationCoordinator>,
    optimizations: Arc<OptimizationManager>,
    config: SubmitterConfig,
}

impl TransactionSubmitter {
    pub fn new(
        rpc: SharedChainRpc,
        blockhash: Arc<BlockhashProvider>,
        lease: SharedLeaseStore,
        invalidation: Arc<InvalidationCoordinator>,
        optimizations: Arc<OptimizationManager>,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            rpc,
            blockhash,
            lease,
            invalidation,
            optimizations,
            config,
        }
    }

    pub async fn submit_transaction(
        &self,
        signer: &(dyn TransactionSigner + Send + Sync),
        request: SubmitRequest,
    ) -> SubmissionOutcome {
        let payer = signer.pubkey();
        let touched = touched_accounts(&request.instructions, &payer, &request.touched);

        match self.submit(signer, &request.instructions).await {
            Ok((signature, landed)) => {
                self.invalidation.clear(&touched);
                self.invalidation
                    .clear_with_delay(touched, self.config.invalidation_delay);

                let already_processed = matches!(landed, Landed::AlreadyProcessed);
                let message = if already_processed {
                    metrics::submission("already_processed");
                    warn!(%signature, "transaction reported as already processed, treating as success");
                    format!(
                        "{} (transaction was already processed and most likely succeeded)",
                        request.success_message
                    )
                } else {
                    metrics::submission("success");
                    info!(%signature, "transaction confirmed");
                    request.success_message
                };

                SubmissionOutcome {
                    success: true,
                    message,
                    signature: Some(signature.to_string()),
                    data: request.data,
                    already_processed,
                }
            }
            Err(error) => {
                metrics::submission("failed");
                warn!(step = error.step(), error = %error, "transaction submission failed");
                SubmissionOutcome::failed(&error)
            }
        }
    }

    async fn submit(
        &self,
        signer: &(dyn TransactionSigner + Send + Sync),
        instructions: &[Instruction],
    ) -> Result<(Signature, Landed), SubmitError> {
        if let Some(lease) = self.lease.read().await? {
            if lease.is_active(ms_since_epoch(), self.config.lease_expiry) {
                return Err(SubmitError::LeaseHeld);
            }
        }

        let latest = self.blockhash.get().await.map_err(SubmitError::Blockhash)?;
        let payer = signer.pubkey();
        let message = Message::new_with_blockhash(instructions, Some(&payer), &latest.blockhash);
        let transaction = signer
            .sign_transaction(Transaction::new_unsigned(message))
            .await?;

        let simulation = self
            .rpc
            .simulate_transaction(&transaction)
            .await
            .map_err(|error| {
                self.optimizations.report_error(&error);
                SubmitError::Simulation(error.to_string())
            })?;
        if let Some(error) = simulation.err {
            return Err(SubmitError::Simulation(extract_error_message(
                &simulation.logs,
                &error,
            )));
        }

        if !self
            .lease
            .try_acquire(ms_since_epoch(), self.config.lease_expiry)
            .await?
        {
            return Err(SubmitError::LeaseHeld);
        }

        let lease = LeaseGuard::new(Arc::clone(&self.lease));
        let result = self.send_and_confirm(&transaction, &latest).await;

        if let Err(error) = lease.release().await {
            warn!(error = %error, "failed to release submission lease");
        }

        result
    }

    async fn send_and_confirm(
        &self,
        transaction: &Transaction,
        latest: &LatestBlockhash,
    ) -> Result<(Signature, Landed), SubmitError> {
        let signature = transaction.signatures.first().copied().unwrap_or_default();

        match self.rpc.send_raw_transaction(transaction).await {
            Ok(_) => {}
            Err(error) if error.is_already_processed() => {
                return Ok((signature, Landed::AlreadyProcessed))
            }
            Err(error) => {
                self.optimizations.report_error(&error);
                return Err(SubmitError::Send(error));
            }
        }

        match self.rpc.confirm_transaction(&signature, latest).await {
            Ok(None) => Ok((signature, Landed::Confirmed)),
            Ok(Some(error)) if is_already_processed_text(&error) => {
                Ok((signature, Landed::AlreadyProcessed))
            }
            Ok(Some(error)) => {
                let logs = self
                    .rpc
                    .get_transaction_logs(&signature)
                    .await
                    .unwrap_or_else(|fetch_error| {
                        warn!(%signature, error = %fetch_error, "failed to fetch transaction logs");
                        Vec::new()
                    });
                Err(SubmitError::Confirmation(extract_error_message(&logs, &error)))
            }
            Err(error) if error.is_already_processed() => Ok((signature, Landed::AlreadyProcessed)),
            Err(error) => {
                if error.is_transient() {
                    self.optimizations.report_error(&error);
                }
                Err(SubmitError::Confirmation(error.to_string()))
            }
        }
    }
}
