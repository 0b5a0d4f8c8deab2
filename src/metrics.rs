use {
    prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder},
    std::sync::Once,
    tracing::error,
};

lazy_static::lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    static ref VERSION: IntCounterVec = IntCounterVec::new(
        Opts::new("version", "Launchpad RPC version info"),
        &["package", "version"]
    ).unwrap();

    static ref CACHE_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_requests_total", "Cache lookups by cache and result"),
        &["cache", "result"]
    ).unwrap();

    static ref CACHE_INVALIDATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_invalidations_total", "Cache invalidations by kind"),
        &["kind"]
    ).unwrap();

    static ref RPC_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rpc_errors_total", "Errors returned by the upstream node"),
        &["method"]
    ).unwrap();

    static ref BREAKER_TRIPPED: IntGauge = IntGauge::new(
        "optimizations_breaker_tripped",
        "1 when the error-rate breaker has disabled all optimizations"
    ).unwrap();

    static ref BLOCKHASH_FETCH_TOTAL: IntCounter = IntCounter::new(
        "blockhash_fetch_total",
        "Total number of live latest-blockhash fetches"
    ).unwrap();

    static ref SUBMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("submissions_total", "Transaction submissions by outcome"),
        &["status"]
    ).unwrap();
}

macro_rules! register {
    ($collector:ident) => {
        REGISTRY
            .register(Box::new($collector.clone()))
            .expect("collector can't be registered")
    };
}

pub fn init() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        register!(VERSION);
        register!(CACHE_REQUESTS_TOTAL);
        register!(CACHE_INVALIDATIONS_TOTAL);
        register!(RPC_ERRORS_TOTAL);
        register!(BREAKER_TRIPPED);
        register!(BLOCKHASH_FETCH_TOTAL);
        register!(SUBMISSIONS_TOTAL);

        VERSION
            .with_label_values(&[env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")])
            .inc();
    });
}

pub fn collect_to_text() -> String {
    TextEncoder::new()
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_else(|error| {
            error!("could not encode custom metrics: {}", error);
            String::new()
        })
}

#[derive(Debug, Clone, Copy)]
pub enum CacheResult {
    Hit,
    Miss,
    Stale,
    Bypass,
}

impl CacheResult {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Stale => "stale",
            Self::Bypass => "bypass",
        }
    }
}

pub fn cache_request(cache: &str, result: CacheResult) {
    CACHE_REQUESTS_TOTAL
        .with_label_values(&[cache, result.as_str()])
        .inc();
}

pub fn cache_requests(cache: &str, result: CacheResult) -> u64 {
    CACHE_REQUESTS_TOTAL
        .with_label_values(&[cache, result.as_str()])
        .get()
}

pub fn cache_invalidation(kind: &str, count: usize) {
    CACHE_INVALIDATIONS_TOTAL
        .with_label_values(&[kind])
        .inc_by(count as u64);
}

pub fn rpc_error(method: &str) {
    RPC_ERRORS_TOTAL.with_label_values(&[method]).inc();
}

pub fn breaker_set_tripped(tripped: bool) {
    BREAKER_TRIPPED.set(i64::from(tripped));
}

pub fn blockhash_fetch_inc() {
    BLOCKHASH_FETCH_TOTAL.inc();
}

pub fn submission(status: &str) {
    SUBMISSIONS_TOTAL.with_label_values(&[status]).inc();
}
