use {
    crate::{metrics, solana_rpc::RpcError},
    serde::{Deserialize, Serialize},
    std::{
        str::FromStr,
        sync::{Arc, Mutex, RwLock},
        time::Duration,
    },
    thiserror::Error,
    tokio::time::Instant,
    tracing::{error, info, warn},
};

/// Errors are counted per window; the window restarts lazily once it is older than this.
pub const ERROR_WINDOW: Duration = Duration::from_secs(60);

pub const ENV_PREFIX: &str = "LAUNCHPAD_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AccountCaching,
    BalanceCaching,
    BlockhashReuse,
    BatchQueries,
    MetadataCaching,
}

impl Feature {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccountCaching => "account_caching",
            Self::BalanceCaching => "balance_caching",
            Self::BlockhashReuse => "blockhash_reuse",
            Self::BatchQueries => "batch_queries",
            Self::MetadataCaching => "metadata_caching",
        }
    }

    pub fn all() -> impl Iterator<Item = Feature> {
        [
            Self::AccountCaching,
            Self::BalanceCaching,
            Self::BlockhashReuse,
            Self::BatchQueries,
            Self::MetadataCaching,
        ]
        .into_iter()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown optimization preset: {0} (expected conservative, aggressive or disabled)")]
    UnknownPreset(String),

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
}

///
/// Whole-record optimization settings. Consumers always read a complete
/// snapshot; updates replace the record.
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizationConfig {
    pub account_caching: bool,
    pub balance_caching: bool,
    pub blockhash_reuse: bool,
    pub batch_queries: bool,
    pub metadata_caching: bool,

    #[serde(with = "humantime_serde")]
    pub account_cache_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub balance_cache_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub blockhash_cache_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub metadata_cache_ttl: Duration,

    pub max_errors_per_minute: u32,
    pub disable_on_high_error_rate: bool,
    pub enable_fallback_mode: bool,

    /// Promotes cache decision logs from debug to info.
    pub logging: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            account_caching: true,
            balance_caching: true,
            blockhash_reuse: true,
            batch_queries: true,
            metadata_caching: true,
            account_cache_ttl: Duration::from_secs(5),
            balance_cache_ttl: Duration::from_secs(3),
            blockhash_cache_ttl: Duration::from_secs(30),
            metadata_cache_ttl: Duration::from_secs(300),
            max_errors_per_minute: 10,
            disable_on_high_error_rate: true,
            enable_fallback_mode: true,
            logging: false,
        }
    }
}

impl OptimizationConfig {
    pub const fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::AccountCaching => self.account_caching,
            Feature::BalanceCaching => self.balance_caching,
            Feature::BlockhashReuse => self.blockhash_reuse,
            Feature::BatchQueries => self.batch_queries,
            Feature::MetadataCaching => self.metadata_caching,
        }
    }

    pub fn enabled_features(&self) -> Vec<&'static str> {
        Feature::all()
            .filter(|feature| self.is_enabled(*feature))
            .map(|feature| feature.as_str())
            .collect()
    }

    /// Returns a copy with every field set in `update` replaced.
    pub fn merged(&self, update: &ConfigUpdate) -> Self {
        Self {
            account_caching: update.account_caching.unwrap_or(self.account_caching),
            balance_caching: update.balance_caching.unwrap_or(self.balance_caching),
            blockhash_reuse: update.blockhash_reuse.unwrap_or(self.blockhash_reuse),
            batch_queries: update.batch_queries.unwrap_or(self.batch_queries),
            metadata_caching: update.metadata_caching.unwrap_or(self.metadata_caching),
            account_cache_ttl: update.account_cache_ttl.unwrap_or(self.account_cache_ttl),
            balance_cache_ttl: update.balance_cache_ttl.unwrap_or(self.balance_cache_ttl),
            blockhash_cache_ttl: update.blockhash_cache_ttl.unwrap_or(self.blockhash_cache_ttl),
            metadata_cache_ttl: update.metadata_cache_ttl.unwrap_or(self.metadata_cache_ttl),
            max_errors_per_minute: update
                .max_errors_per_minute
                .unwrap_or(self.max_errors_per_minute),
            disable_on_high_error_rate: update
                .disable_on_high_error_rate
                .unwrap_or(self.disable_on_high_error_rate),
            enable_fallback_mode: update
                .enable_fallback_mode
                .unwrap_or(self.enable_fallback_mode),
            logging: update.logging.unwrap_or(self.logging),
        }
    }
}

///
/// Partial [`OptimizationConfig`]. Unknown keys are rejected.
///
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_caching: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_caching: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash_reuse: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_queries: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_caching: Option<bool>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub account_cache_ttl: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub balance_cache_ttl: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub blockhash_cache_ttl: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub metadata_cache_ttl: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_errors_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_on_high_error_rate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_fallback_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<bool>,
}

impl ConfigUpdate {
    pub fn disable_all() -> Self {
        Self {
            account_caching: Some(false),
            balance_caching: Some(false),
            blockhash_reuse: Some(false),
            batch_queries: Some(false),
            metadata_caching: Some(false),
            ..Default::default()
        }
    }

    /// Whether applying this update turns off a feature that `current` has on.
    pub fn disables_any(&self, current: &OptimizationConfig) -> bool {
        let next = current.merged(self);
        Feature::all().any(|feature| current.is_enabled(feature) && !next.is_enabled(feature))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Conservative,
    Aggressive,
    Disabled,
}

impl Preset {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Aggressive => "aggressive",
            Self::Disabled => "disabled",
        }
    }

    pub fn update(&self) -> ConfigUpdate {
        match self {
            Self::Conservative => ConfigUpdate {
                account_caching: Some(true),
                balance_caching: Some(true),
                blockhash_reuse: Some(true),
                batch_queries: Some(true),
                metadata_caching: Some(true),
                account_cache_ttl: Some(Duration::from_secs(2)),
                balance_cache_ttl: Some(Duration::from_secs(1)),
                blockhash_cache_ttl: Some(Duration::from_secs(15)),
                metadata_cache_ttl: Some(Duration::from_secs(60)),
                max_errors_per_minute: Some(5),
                disable_on_high_error_rate: Some(true),
                ..Default::default()
            },
            Self::Aggressive => ConfigUpdate {
                account_caching: Some(true),
                balance_caching: Some(true),
                blockhash_reuse: Some(true),
                batch_queries: Some(true),
                metadata_caching: Some(true),
                account_cache_ttl: Some(Duration::from_secs(10)),
                balance_cache_ttl: Some(Duration::from_secs(5)),
                blockhash_cache_ttl: Some(Duration::from_secs(45)),
                metadata_cache_ttl: Some(Duration::from_secs(600)),
                max_errors_per_minute: Some(20),
                ..Default::default()
            },
            Self::Disabled => ConfigUpdate::disable_all(),
        }
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "aggressive" => Ok(Self::Aggressive),
            "disabled" => Ok(Self::Disabled),
            _ => Err(ConfigError::UnknownPreset(name.to_owned())),
        }
    }
}

///
/// Overrides read once from `LAUNCHPAD_*` environment variables.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub preset: Option<Preset>,
    pub update: ConfigUpdate,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let name = format!("{ENV_PREFIX}{name}");
            lookup(&name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(|value| (name, value))
        };
        let flag = |name: &str| -> Result<bool, ConfigError> {
            match var(name) {
                None => Ok(false),
                Some((name, value)) => parse_bool(&value)
                    .ok_or(ConfigError::InvalidValue { name, value }),
            }
        };
        let ttl = |name: &str| -> Result<Option<Duration>, ConfigError> {
            var(name)
                .map(|(name, value)| {
                    value
                        .parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|_| ConfigError::InvalidValue { name, value })
                })
                .transpose()
        };

        let mut update = if flag("DISABLE_ALL_OPTIMIZATIONS")? {
            ConfigUpdate::disable_all()
        } else {
            ConfigUpdate::default()
        };
        for (feature, slot) in [
            ("DISABLE_ACCOUNT_CACHING", &mut update.account_caching),
            ("DISABLE_BALANCE_CACHING", &mut update.balance_caching),
            ("DISABLE_BLOCKHASH_REUSE", &mut update.blockhash_reuse),
            ("DISABLE_BATCH_QUERIES", &mut update.batch_queries),
            ("DISABLE_METADATA_CACHING", &mut update.metadata_caching),
        ] {
            if flag(feature)? {
                *slot = Some(false);
            }
        }
        update.account_cache_ttl = ttl("ACCOUNT_CACHE_TTL_MS")?;
        update.balance_cache_ttl = ttl("BALANCE_CACHE_TTL_MS")?;
        update.blockhash_cache_ttl = ttl("BLOCKHASH_CACHE_TTL_MS")?;
        update.metadata_cache_ttl = ttl("METADATA_CACHE_TTL_MS")?;
        if let Some((name, value)) = var("OPTIMIZATION_LOGGING") {
            update.logging = Some(parse_bool(&value).ok_or(ConfigError::InvalidValue { name, value })?);
        }

        let preset = var("OPTIMIZATION_PRESET")
            .map(|(_, value)| value.parse())
            .transpose()?;

        Ok(Self { preset, update })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorWindow {
    pub count: u32,
    pub window_started_at: Instant,
}

impl ErrorWindow {
    fn new() -> Self {
        Self {
            count: 0,
            window_started_at: Instant::now(),
        }
    }

    /// Restarts the window if it is older than [`ERROR_WINDOW`], then counts one error.
    fn record(&mut self, now: Instant) -> u32 {
        if now.duration_since(self.window_started_at) > ERROR_WINDOW {
            self.count = 0;
            self.window_started_at = now;
        }
        self.count = self.count.saturating_add(1);
        self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    Armed,
    Tripped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReport {
    Counted,
    Tripped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub breaker: BreakerState,
    pub errors_in_window: u32,
    pub window_age_ms: u64,
    pub enabled_features: Vec<String>,
    pub config: OptimizationConfig,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    window: ErrorWindow,
}

///
/// Decides which optimizations are active and trips a breaker that turns all of
/// them off once the upstream error rate crosses `max_errors_per_minute`.
///
/// Armed -> Tripped happens on an error-rate breach. Tripped -> Armed only through
/// [`OptimizationManager::rearm`].
///
#[derive(Debug)]
pub struct OptimizationManager {
    base: OptimizationConfig,
    config: RwLock<Arc<OptimizationConfig>>,
    breaker: Mutex<BreakerInner>,
}

impl Default for OptimizationManager {
    fn default() -> Self {
        Self::new(OptimizationConfig::default())
    }
}

impl OptimizationManager {
    ///
    /// `base` is the startup configuration (defaults, presets, file and environment
    /// overrides already applied). [`Self::rearm`] returns to it.
    ///
    pub fn new(base: OptimizationConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(base.clone())),
            base,
            breaker: Mutex::new(BreakerInner {
                state: BreakerState::Armed,
                window: ErrorWindow::new(),
            }),
        }
    }

    ///
    /// Builds the startup configuration: defaults, then the env preset, the file
    /// preset, the file overrides and finally the env flags and TTLs.
    ///
    pub fn resolve_base(
        file_preset: Option<Preset>,
        file_overrides: &ConfigUpdate,
        env: &EnvOverrides,
    ) -> OptimizationConfig {
        let mut config = OptimizationConfig::default();
        for preset in [env.preset, file_preset].into_iter().flatten() {
            config = config.merged(&preset.update());
        }
        config.merged(file_overrides).merged(&env.update)
    }

    pub fn config(&self) -> Arc<OptimizationConfig> {
        Arc::clone(&self.config.read().expect("config lock poisoned"))
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.lock().expect("breaker lock poisoned").state
    }

    pub fn is_tripped(&self) -> bool {
        self.breaker_state() == BreakerState::Tripped
    }

    pub fn should_use(&self, feature: Feature) -> bool {
        !self.is_tripped() && self.config().is_enabled(feature)
    }

    /// TTL for a cache-backed feature.
    pub fn ttl(&self, feature: Feature) -> Duration {
        let config = self.config();
        match feature {
            Feature::AccountCaching | Feature::BatchQueries => config.account_cache_ttl,
            Feature::BalanceCaching => config.balance_cache_ttl,
            Feature::BlockhashReuse => config.blockhash_cache_ttl,
            Feature::MetadataCaching => config.metadata_cache_ttl,
        }
    }

    /// Merges `update` into the current record and swaps it in whole.
    pub fn update_config(&self, update: &ConfigUpdate) -> Arc<OptimizationConfig> {
        let mut config = self.config.write().expect("config lock poisoned");
        let next = Arc::new(config.merged(update));
        *config = Arc::clone(&next);
        info!(enabled = ?next.enabled_features(), "optimization config updated");
        next
    }

    pub fn apply_preset(&self, name: &str) -> Result<Arc<OptimizationConfig>, ConfigError> {
        let preset: Preset = name.parse()?;
        info!(preset = preset.as_str(), "applying optimization preset");
        Ok(self.update_config(&preset.update()))
    }

    pub fn report_error(&self, error: &RpcError) -> ErrorReport {
        if error.is_validation() {
            return ErrorReport::Counted;
        }
        let config = self.config();
        let mut breaker = self.breaker.lock().expect("breaker lock poisoned");
        let count = breaker.window.record(Instant::now());

        if breaker.state == BreakerState::Armed
            && config.disable_on_high_error_rate
            && count >= config.max_errors_per_minute
        {
            breaker.state = BreakerState::Tripped;
            metrics::breaker_set_tripped(true);
            error!(
                errors = count,
                max_errors_per_minute = config.max_errors_per_minute,
                last_error = %error,
                "high rpc error rate, disabling all optimizations until re-armed"
            );
            return ErrorReport::Tripped;
        }

        if config.logging {
            warn!(errors = count, error = %error, "rpc error reported");
        }
        ErrorReport::Counted
    }

    /// Clears the breaker and error count, and restores the startup configuration.
    pub fn rearm(&self) {
        {
            let mut breaker = self.breaker.lock().expect("breaker lock poisoned");
            breaker.state = BreakerState::Armed;
            breaker.window = ErrorWindow::new();
        }
        *self.config.write().expect("config lock poisoned") = Arc::new(self.base.clone());
        metrics::breaker_set_tripped(false);
        info!("optimizations re-armed");
    }

    pub fn status(&self) -> OptimizationStatus {
        let config = self.config();
        let breaker = self.breaker.lock().expect("breaker lock poisoned");
        let enabled_features = match breaker.state {
            BreakerState::Armed => config
                .enabled_features()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            BreakerState::Tripped => Vec::new(),
        };
        OptimizationStatus {
            breaker: breaker.state,
            errors_in_window: breaker.window.count,
            window_age_ms: breaker.window.window_started_at.elapsed().as_millis() as u64,
            enabled_features,
            config: config.as_ref().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::collections::HashMap,
        tokio::time::advance,
    };

    fn transient() -> RpcError {
        RpcError::Transient("timeout".to_owned())
    }

    fn manager(max_errors_per_minute: u32) -> OptimizationManager {
        OptimizationManager::new(OptimizationConfig {
            max_errors_per_minute,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_trips_at_threshold_and_disables_everything() {
        let manager = manager(5);
        for _ in 0..4 {
            assert_eq!(manager.report_error(&transient()), ErrorReport::Counted);
            advance(Duration::from_secs(2)).await;
        }
        assert!(Feature::all().all(|feature| manager.should_use(feature)));

        assert_eq!(manager.report_error(&transient()), ErrorReport::Tripped);
        assert_eq!(manager.report_error(&transient()), ErrorReport::Counted);
        assert!(manager.is_tripped());
        assert!(Feature::all().all(|feature| !manager.should_use(feature)));
        // stored flags are untouched, only masked
        assert!(manager.config().account_caching);
        assert!(manager.status().enabled_features.is_empty());

        manager.rearm();
        assert!(!manager.is_tripped());
        assert!(Feature::all().all(|feature| manager.should_use(feature)));
        assert_eq!(manager.status().errors_in_window, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tripped_breaker_does_not_recover_on_its_own() {
        let manager = manager(1);
        manager.report_error(&transient());
        advance(Duration::from_secs(600)).await;
        assert!(!manager.should_use(Feature::AccountCaching));
    }

    #[tokio::test(start_paused = true)]
    async fn error_window_resets_after_a_minute() {
        let manager = manager(3);
        manager.report_error(&transient());
        manager.report_error(&transient());
        advance(Duration::from_secs(61)).await;

        assert_eq!(manager.report_error(&transient()), ErrorReport::Counted);
        assert_eq!(manager.status().errors_in_window, 1);
        assert!(!manager.is_tripped());
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_respects_disable_on_high_error_rate() {
        let manager = OptimizationManager::new(OptimizationConfig {
            max_errors_per_minute: 1,
            disable_on_high_error_rate: false,
            ..Default::default()
        });
        manager.report_error(&transient());
        manager.report_error(&transient());
        assert!(!manager.is_tripped());
    }

    #[test]
    fn validation_errors_are_not_counted() {
        let manager = manager(1);
        manager.report_error(&RpcError::InvalidInput("bad key".to_owned()));
        assert!(!manager.is_tripped());
        assert_eq!(manager.status().errors_in_window, 0);
    }

    #[test]
    fn update_config_replaces_record() {
        let manager = OptimizationManager::default();
        let before = manager.config();
        let after = manager.update_config(&ConfigUpdate {
            balance_caching: Some(false),
            account_cache_ttl: Some(Duration::from_millis(100)),
            ..Default::default()
        });

        assert!(before.balance_caching);
        assert!(!after.balance_caching);
        assert_eq!(manager.ttl(Feature::AccountCaching), Duration::from_millis(100));
        assert!(!manager.should_use(Feature::BalanceCaching));
        assert!(manager.should_use(Feature::AccountCaching));
    }

    #[test]
    fn apply_preset_by_name() {
        let manager = OptimizationManager::default();
        let config = manager.apply_preset("disabled").unwrap();
        assert!(config.enabled_features().is_empty());

        let config = manager.apply_preset("Aggressive").unwrap();
        assert_eq!(config.account_cache_ttl, Duration::from_secs(10));
        assert!(manager.should_use(Feature::BlockhashReuse));

        assert!(matches!(
            manager.apply_preset("turbo"),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn rearm_restores_base_config() {
        let manager = OptimizationManager::default();
        manager.apply_preset("disabled").unwrap();
        manager.rearm();
        assert_eq!(*manager.config(), OptimizationConfig::default());
    }

    #[test]
    fn config_update_rejects_unknown_keys() {
        let update: ConfigUpdate =
            serde_json::from_str(r#"{"account_caching": false, "balance_cache_ttl": "250ms"}"#)
                .unwrap();
        assert_eq!(update.account_caching, Some(false));
        assert_eq!(update.balance_cache_ttl, Some(Duration::from_millis(250)));

        assert!(serde_json::from_str::<ConfigUpdate>(r#"{"turbo_mode": true}"#).is_err());
    }

    #[test]
    fn disables_any_detects_rollback() {
        let config = OptimizationConfig::default();
        assert!(ConfigUpdate::disable_all().disables_any(&config));
        assert!(!ConfigUpdate {
            account_cache_ttl: Some(Duration::from_secs(1)),
            ..Default::default()
        }
        .disables_any(&config));
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LAUNCHPAD_DISABLE_BALANCE_CACHING", "true"),
            ("LAUNCHPAD_ACCOUNT_CACHE_TTL_MS", "750"),
            ("LAUNCHPAD_OPTIMIZATION_LOGGING", "1"),
            ("LAUNCHPAD_OPTIMIZATION_PRESET", "conservative"),
        ]
        .into_iter()
        .collect();
        let env = EnvOverrides::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(env.preset, Some(Preset::Conservative));
        assert_eq!(env.update.balance_caching, Some(false));
        assert_eq!(env.update.account_caching, None);

        let base = OptimizationManager::resolve_base(None, &ConfigUpdate::default(), &env);
        assert!(!base.balance_caching);
        assert!(base.logging);
        assert_eq!(base.account_cache_ttl, Duration::from_millis(750));
        // conservative preset still applies to what the env leaves alone
        assert_eq!(base.blockhash_cache_ttl, Duration::from_secs(15));
    }

    #[test]
    fn env_disable_all_and_invalid_values() {
        let env = EnvOverrides::from_lookup(|name| {
            (name == "LAUNCHPAD_DISABLE_ALL_OPTIMIZATIONS").then(|| "yes".to_owned())
        })
        .unwrap();
        let base = OptimizationManager::resolve_base(None, &ConfigUpdate::default(), &env);
        assert!(base.enabled_features().is_empty());

        let invalid = EnvOverrides::from_lookup(|name| {
            (name == "LAUNCHPAD_BLOCKHASH_CACHE_TTL_MS").then(|| "soon".to_owned())
        });
        assert!(matches!(invalid, Err(ConfigError::InvalidValue { .. })));
    }
}
