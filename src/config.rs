use {
    crate::{
        invalidation::DEFAULT_INVALIDATION_DELAY,
        lease::{FileLeaseStore, MemoryLeaseStore, SharedLeaseStore, DEFAULT_LEASE_EXPIRY},
        optimization::{ConfigUpdate, EnvOverrides, OptimizationConfig, OptimizationManager, Preset},
        submitter::SubmitterConfig,
        util::CommitmentLevel,
    },
    anyhow::Context,
    serde::{
        de::{self, Deserializer},
        Deserialize,
    },
    std::{
        net::{Ipv4Addr, SocketAddr, SocketAddrV4},
        path::{Path, PathBuf},
        sync::Arc,
    },
    tokio::{fs, time::Duration},
};

pub async fn load_config<T>(path: impl AsRef<Path>) -> anyhow::Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let contents = fs::read(path)
        .await
        .with_context(|| "failed to read config")?;
    serde_yaml::from_slice(&contents).map_err(Into::into)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLaunchpad {
    #[serde(default)]
    pub tracing: ConfigTracing,

    /// Blockchain node the caches sit in front of
    pub upstream: ConfigUpstream,

    /// Optimization preset and overrides, applied on top of the defaults
    #[serde(default)]
    pub optimizations: ConfigOptimizations,

    /// Transaction submission options
    #[serde(default)]
    pub submission: ConfigSubmission,

    /// Admin server listen options
    pub listen_admin: ConfigListenAdmin,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigTracing {
    pub json: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpstream {
    /// RPC endpoint
    #[serde(default = "ConfigUpstream::default_rpc")]
    pub rpc: String,

    #[serde(default)]
    pub commitment: CommitmentLevel,

    /// Timeout of a single RPC request
    #[serde(default = "ConfigUpstream::default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// How often signature statuses are polled while confirming
    #[serde(
        default = "ConfigUpstream::default_confirm_poll_interval",
        with = "humantime_serde"
    )]
    pub confirm_poll_interval: Duration,
}

impl ConfigUpstream {
    fn default_rpc() -> String {
        "http://127.0.0.1:8899".to_owned()
    }

    const fn default_timeout() -> Duration {
        Duration::from_secs(30)
    }

    const fn default_confirm_poll_interval() -> Duration {
        Duration::from_millis(500)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOptimizations {
    pub preset: Option<Preset>,

    #[serde(default)]
    pub overrides: ConfigUpdate,
}

impl ConfigOptimizations {
    ///
    /// Startup configuration: defaults, env preset, file preset, file overrides,
    /// then env flags and TTLs.
    ///
    pub fn resolve(&self, env: &EnvOverrides) -> OptimizationConfig {
        OptimizationManager::resolve_base(self.preset, &self.overrides, env)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSubmission {
    /// Where the submission lease is persisted, kept in memory when unset
    #[serde(default)]
    pub lease_path: Option<PathBuf>,

    /// Age after which a lease is considered abandoned
    #[serde(
        default = "ConfigSubmission::default_lease_expiry",
        with = "humantime_serde"
    )]
    pub lease_expiry: Duration,

    /// Delay of the second invalidation pass after a successful transaction
    #[serde(
        default = "ConfigSubmission::default_invalidation_delay",
        with = "humantime_serde"
    )]
    pub invalidation_delay: Duration,
}

impl Default for ConfigSubmission {
    fn default() -> Self {
        Self {
            lease_path: None,
            lease_expiry: Self::default_lease_expiry(),
            invalidation_delay: Self::default_invalidation_delay(),
        }
    }
}

impl ConfigSubmission {
    const fn default_lease_expiry() -> Duration {
        DEFAULT_LEASE_EXPIRY
    }

    const fn default_invalidation_delay() -> Duration {
        DEFAULT_INVALIDATION_DELAY
    }

    pub const fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig {
            lease_expiry: self.lease_expiry,
            invalidation_delay: self.invalidation_delay,
        }
    }

    pub fn lease_store(&self) -> SharedLeaseStore {
        match &self.lease_path {
            Some(path) => Arc::new(FileLeaseStore::new(path)),
            None => Arc::new(MemoryLeaseStore::default()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigListenAdmin {
    /// RPC listen address
    #[serde(deserialize_with = "deserialize_listen")]
    pub bind: SocketAddr,
}

fn deserialize_listen<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum Value {
        SocketAddr(SocketAddr),
        Port(u16),
        Env { env: String },
    }

    let any_port = |port| SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), port));
    match Value::deserialize(deserializer)? {
        Value::SocketAddr(addr) => Ok(addr),
        Value::Port(port) => Ok(any_port(port)),
        Value::Env { env } => std::env::var(&env)
            .map_err(|error| format!("{env}: {error}"))
            .and_then(|value| match value.parse() {
                Ok(addr) => Ok(addr),
                Err(error) => value
                    .parse()
                    .map(any_port)
                    .map_err(|_| format!("{error:?}")),
            })
            .map_err(de::Error::custom),
    }
}
