#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    jsonrpsee::http_client::HttpClientBuilder,
    launchpad_rpc::{
        config::{load_config, ConfigLaunchpad},
        metrics,
        optimization::{ConfigUpdate, EnvOverrides},
        rpc::{rpc_admin::RpcClient, RpcServer},
        service::LaunchpadRpc,
        setup_tracing,
        solana_rpc::{SharedChainRpc, SolanaRpc},
    },
    std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    },
    tokio::{
        runtime::Builder,
        signal::unix::{signal, SignalKind},
    },
    tracing::info,
};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Path to config
    #[clap(long)]
    pub config: PathBuf,

    /// Only check config and exit
    #[clap(long, default_value_t = false)]
    pub check: bool,

    #[command(subcommand)]
    pub command: Option<ArgsCommands>,
}

#[derive(Debug, Subcommand)]
enum ArgsCommands {
    /// Launchpad admin RPC interface
    Admin {
        #[command(subcommand)]
        cmd: ArgsCommandAdmin,
    },
}

#[derive(Debug, Subcommand)]
enum ArgsCommandAdmin {
    /// Print breaker state, optimization config and cache sizes
    GetStatus,
    /// Apply a named preset: conservative, aggressive or disabled
    ApplyPreset {
        name: String,
    },
    /// Merge a partial optimization config, e.g. '{"balance_caching": false}'
    UpdateConfig {
        update: String,
    },
    /// Drop every cached value
    ClearCaches,
    /// Re-arm the error-rate breaker and restore the startup config
    Rearm,
}

fn main() -> anyhow::Result<()> {
    Builder::new_multi_thread()
        .thread_name_fn(|| {
            static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
            let id = ATOMIC_ID.fetch_add(1, Ordering::Relaxed);
            format!("launchpad.tokio{id:02}")
        })
        .enable_all()
        .build()?
        .block_on(main2())
}

async fn main2() -> anyhow::Result<()> {
    let args = Args::parse();
    let config: ConfigLaunchpad = load_config(&args.config).await?;
    let env = EnvOverrides::from_env().context("invalid LAUNCHPAD_* environment override")?;
    if args.check {
        return Ok(());
    }

    setup_tracing(config.tracing.json)?;

    match args.command {
        Some(ArgsCommands::Admin { cmd }) => run_cmd_admin(config, cmd).await,
        None => run_launchpad(config, env).await,
    }
}

async fn run_cmd_admin(config: ConfigLaunchpad, admin_cmd: ArgsCommandAdmin) -> anyhow::Result<()> {
    let addr = format!("http://{}", config.listen_admin.bind);
    let client = HttpClientBuilder::default().build(addr)?;

    match admin_cmd {
        ArgsCommandAdmin::GetStatus => {
            let status = client.get_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        ArgsCommandAdmin::ApplyPreset { name } => {
            let config = client.apply_preset(name).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ArgsCommandAdmin::UpdateConfig { update } => {
            let update: ConfigUpdate =
                serde_json::from_str(&update).context("invalid optimization config update")?;
            let config = client.update_config(update).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ArgsCommandAdmin::ClearCaches => {
            let removed = client.clear_all_caches().await?;
            println!("Removed {removed} cached entries");
        }
        ArgsCommandAdmin::Rearm => {
            client.rearm().await?;
            println!("Optimizations re-armed");
        }
    }

    Ok(())
}

async fn run_launchpad(config: ConfigLaunchpad, env: EnvOverrides) -> anyhow::Result<()> {
    metrics::init();

    let base = config.optimizations.resolve(&env);
    info!(enabled = ?base.enabled_features(), "optimizations resolved");

    let rpc: SharedChainRpc = Arc::new(SolanaRpc::from_url(
        config.upstream.rpc.clone(),
        config.upstream.timeout,
        config.upstream.commitment,
        config.upstream.confirm_poll_interval,
    ));
    let service = Arc::new(LaunchpadRpc::new(
        rpc,
        config.submission.lease_store(),
        base,
        config.submission.submitter_config(),
    ));

    let rpc_admin = RpcServer::new(config.listen_admin.bind, Arc::clone(&service)).await?;

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received..."),
        _ = sigterm.recv() => info!("SIGTERM received..."),
    }

    rpc_admin.shutdown();
    service.dispose().await;
    Ok(())
}
