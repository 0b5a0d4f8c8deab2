use {
    serde::{Deserialize, Serialize},
    solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel as SolanaCommitmentLevel},
};

/// Commitment used for every read and for confirmation polling.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl From<CommitmentLevel> for CommitmentConfig {
    fn from(level: CommitmentLevel) -> Self {
        let commitment = match level {
            CommitmentLevel::Processed => SolanaCommitmentLevel::Processed,
            CommitmentLevel::Confirmed => SolanaCommitmentLevel::Confirmed,
            CommitmentLevel::Finalized => SolanaCommitmentLevel::Finalized,
        };
        CommitmentConfig { commitment }
    }
}

/// Wall-clock milliseconds, used for state that outlives the process.
pub fn ms_since_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_level_into_solana_config() {
        let config: CommitmentConfig = CommitmentLevel::Finalized.into();
        assert_eq!(config, CommitmentConfig::finalized());

        let config: CommitmentConfig = CommitmentLevel::default().into();
        assert_eq!(config, CommitmentConfig::confirmed());
    }

    #[test]
    fn commitment_level_from_yaml() {
        let level: CommitmentLevel = serde_yaml::from_str("processed").unwrap();
        assert_eq!(level, CommitmentLevel::Processed);
        assert!(serde_yaml::from_str::<CommitmentLevel>("recent").is_err());
    }

    #[test]
    fn ms_since_epoch_moves_forward() {
        let before = ms_since_epoch();
        assert!(before > 0);
        assert!(ms_since_epoch() >= before);
    }
}
