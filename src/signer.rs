use {
    solana_sdk::{
        pubkey::Pubkey,
        signature::Keypair,
        signer::{Signer, SignerError},
        transaction::Transaction,
    },
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum SignError {
    #[error("signer rejected the transaction: {0}")]
    Rejected(String),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

///
/// Wallet collaborator that turns an unsigned transaction into a signed one.
/// The fee payer is the signer's public key.
///
#[async_trait::async_trait]
pub trait TransactionSigner {
    fn pubkey(&self) -> Pubkey;

    async fn sign_transaction(&self, transaction: Transaction) -> Result<Transaction, SignError>;
}

pub struct KeypairSigner(Keypair);

impl Clone for KeypairSigner {
    fn clone(&self) -> Self {
        Self(self.0.insecure_clone())
    }
}

impl PartialEq for KeypairSigner {
    fn eq(&self, other: &Self) -> bool {
        self.0.pubkey() == other.0.pubkey()
    }
}

impl std::fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("KeypairSigner").field(&self.0.pubkey()).finish()
    }
}

impl KeypairSigner {
    pub const fn new(keypair: Keypair) -> Self {
        Self(keypair)
    }
}

#[async_trait::async_trait]
impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.0.pubkey()
    }

    async fn sign_transaction(&self, mut transaction: Transaction) -> Result<Transaction, SignError> {
        let blockhash = transaction.message.recent_blockhash;
        transaction.try_sign(&[&self.0], blockhash)?;
        Ok(transaction)
    }
}

pub mod testkit {
    use super::*;

    /// Signer that refuses every transaction, like a wallet whose user clicked "reject".
    #[derive(Debug, Clone, Copy)]
    pub struct RejectingSigner(pub Pubkey);

    #[async_trait::async_trait]
    impl TransactionSigner for RejectingSigner {
        fn pubkey(&self) -> Pubkey {
            self.0
        }

        async fn sign_transaction(&self, _transaction: Transaction) -> Result<Transaction, SignError> {
            Err(SignError::Rejected("user rejected the request".to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        solana_sdk::{hash::Hash, message::Message, system_instruction},
    };

    #[tokio::test]
    async fn keypair_signer_signs_for_fee_payer() {
        let signer = KeypairSigner::new(Keypair::new());
        let payer = signer.pubkey();
        let instruction = system_instruction::transfer(&payer, &Pubkey::new_unique(), 1);
        let message = Message::new_with_blockhash(&[instruction], Some(&payer), &Hash::new_unique());

        let signed = signer
            .sign_transaction(Transaction::new_unsigned(message))
            .await
            .unwrap();
        assert!(signed.is_signed());
        assert!(signed.verify().is_ok());
    }

    #[tokio::test]
    async fn keypair_signer_refuses_foreign_payer() {
        let signer = KeypairSigner::new(Keypair::new());
        let payer = Pubkey::new_unique();
        let instruction = system_instruction::transfer(&payer, &Pubkey::new_unique(), 1);
        let message = Message::new_with_blockhash(&[instruction], Some(&payer), &Hash::new_unique());

        let result = signer.sign_transaction(Transaction::new_unsigned(message)).await;
        assert!(matches!(result, Err(SignError::Signer(_))));
    }
}
