//! nos-mechd - VLAN reconciliation agent
//!
//! Reads port events as JSON lines and applies them to the configured
//! switches.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};

use nos_binding_store::{BindingStore, MemoryBindingStore, RedisBindingStore};
use nos_drivers::{DriverContext, DriverSelector};
use nos_fabric_common::{FabricConfig, StoreBackend};
use nos_mechd::{run_events, NosMechanism};

#[derive(Parser, Debug)]
#[command(name = "nos-mechd")]
#[command(about = "Reconcile port events onto top-of-rack switch VLANs", long_about = None)]
struct Args {
    /// Agent configuration (YAML)
    #[arg(long, default_value = "/etc/nos-fabric/agent.yaml")]
    config: PathBuf,

    /// Event stream, one JSON event per line; `-` reads stdin
    #[arg(long, default_value = "-")]
    events: String,

    /// Binding store backend, overriding the configuration
    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    /// Redis URL, overriding the configuration
    #[arg(long)]
    redis_url: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreArg {
    /// Process-local store
    Memory,
    /// Redis hashes
    Redis,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Memory => StoreBackend::Memory,
            StoreArg::Redis => StoreBackend::Redis,
        }
    }
}

/// Initializes tracing; `RUST_LOG` wins over the configured level.
fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let config = FabricConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_logging(&config.agent.log_level);

    info!("--- Starting nos-mechd ---");

    let mut store_config = config.agent.store.clone();
    if let Some(backend) = args.store {
        store_config.backend = backend.into();
    }
    if let Some(url) = args.redis_url {
        store_config.redis_url = url;
    }

    let store: Arc<dyn BindingStore> = match store_config.backend {
        StoreBackend::Memory => Arc::new(MemoryBindingStore::new()),
        StoreBackend::Redis => Arc::new(
            RedisBindingStore::connect(&store_config.redis_url)
                .await
                .context("connecting to the binding store")?,
        ),
    };
    info!(backend = ?store_config.backend, "Binding store ready");

    let inventory = Arc::new(config.switches.clone());
    let ctx = DriverContext::new(inventory.clone(), store.clone(), config.agent.timeouts.clone());
    let selector = Arc::new(DriverSelector::with_default_drivers(ctx));
    let mech = NosMechanism::new(inventory, store, selector, &config.agent);

    let stats = if args.events == "-" {
        run_events(&mech, BufReader::new(tokio::io::stdin())).await?
    } else {
        let file = tokio::fs::File::open(&args.events)
            .await
            .with_context(|| format!("opening {}", args.events))?;
        run_events(&mech, BufReader::new(file)).await?
    };

    info!(
        applied = stats.applied,
        failed = stats.failed,
        malformed = stats.malformed,
        "Event stream finished"
    );
    Ok(stats.failed == 0 && stats.malformed == 0)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %format!("{:#}", err), "nos-mechd failed");
            eprintln!("nos-mechd: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
