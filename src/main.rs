//! CrossBridge relayer CLI
//!
//! - crossbridge-relayer relay        -> long-running relayer
//! - crossbridge-relayer bridge       -> approve + bridgeTokens on the origin chain
//! - crossbridge-relayer bridge-back  -> bridgeTokensBack on the destination chain
//! - crossbridge-relayer status       -> ledger counts and block cursors

use std::net::SocketAddr;

use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use eyre::Result;
use tokio::sync::watch;

use crossbridge_relayer::api::{self, AppState};
use crossbridge_relayer::chain;
use crossbridge_relayer::config::Config;
use crossbridge_relayer::initiator;
use crossbridge_relayer::ledger;
use crossbridge_relayer::relay::RelayService;

#[derive(Parser)]
#[command(name = "crossbridge-relayer")]
#[command(about = "Relayer and bridge tools for CrossBridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a .env file
    #[arg(long, global = true, default_value = ".env")]
    env_file: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay bridge events between the origin and destination chains
    Relay,

    /// Deposit tokens into the origin bridge
    Bridge {
        /// ERC20 token on the origin chain
        #[arg(long)]
        token: Address,

        /// Human-readable amount, scaled by the token's decimals
        #[arg(long, default_value = "100")]
        amount: String,

        /// Recipient on the destination chain (defaults to the signer)
        #[arg(long)]
        recipient: Option<Address>,
    },

    /// Burn wrapped tokens on the destination for release on the origin
    BridgeBack {
        /// Wrapped token (defaults to the last wrapped token the bridge lists)
        #[arg(long)]
        token: Option<Address>,

        /// Human-readable amount, scaled by the token's decimals
        #[arg(long, default_value = "100")]
        amount: String,

        /// Recipient on the origin chain (defaults to the signer)
        #[arg(long)]
        recipient: Option<Address>,

        /// Unwrap to the native currency on release
        #[arg(long)]
        convert_to_native: bool,
    },

    /// Show ledger counts and block cursors
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    init_logging();

    let config = Config::load_from_file(&cli.env_file)?;
    tracing::info!(
        origin_chain_id = config.origin.chain_id,
        destination_chain_id = config.destination.chain_id,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Relay => run_relayer(config).await,
        Commands::Bridge {
            token,
            amount,
            recipient,
        } => {
            let origin = chain::connect(&config.origin, &config.signer.private_key, &config.relayer)?;
            let deposit = initiator::bridge_tokens(
                origin.as_ref(),
                token,
                &amount,
                config.destination.chain_id,
                recipient,
            )
            .await?;
            tracing::info!(
                amount = %deposit.amount,
                recipient = %deposit.recipient,
                tx_hash = %deposit.bridge.tx_hash,
                "Tokens bridged"
            );
            Ok(())
        }
        Commands::BridgeBack {
            token,
            amount,
            recipient,
            convert_to_native,
        } => {
            let destination = chain::connect(
                &config.destination,
                &config.signer.private_key,
                &config.relayer,
            )?;
            if let Some(withdrawal) = initiator::bridge_back(
                destination.as_ref(),
                token,
                &amount,
                recipient,
                convert_to_native,
            )
            .await?
            {
                tracing::info!(
                    wrapped = %withdrawal.wrapped_token,
                    origin_token = %withdrawal.origin_token,
                    amount = %withdrawal.amount,
                    tx_hash = %withdrawal.receipt.tx_hash,
                    "Tokens bridged back"
                );
            }
            Ok(())
        }
        Commands::Status { json } => print_status(&config, json).await,
    }
}

async fn run_relayer(config: Config) -> Result<()> {
    tracing::info!("Starting CrossBridge relayer");

    let origin = chain::connect(&config.origin, &config.signer.private_key, &config.relayer)?;
    let destination = chain::connect(
        &config.destination,
        &config.signer.private_key,
        &config.relayer,
    )?;

    let ledger = ledger::open(config.database.as_ref().map(|db| db.url.as_str())).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Start metrics/API server
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    let api_state = AppState::new(
        ledger.clone(),
        config.origin.chain_id,
        config.destination.chain_id,
    );
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_state).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let service = RelayService::new(origin, destination, ledger, &config);
    service.run(shutdown_rx).await?;

    tracing::info!("CrossBridge relayer stopped");
    Ok(())
}

async fn print_status(config: &Config, json: bool) -> Result<()> {
    let ledger = ledger::open(config.database.as_ref().map(|db| db.url.as_str())).await?;

    let counts = ledger.counts().await?;
    let mut cursors = Vec::new();
    for endpoint in [&config.origin, &config.destination] {
        cursors.push((endpoint, ledger.last_block(endpoint.chain_id).await?));
    }

    if json {
        let chains: Vec<_> = cursors
            .iter()
            .map(|(endpoint, block)| {
                serde_json::json!({
                    "name": endpoint.name,
                    "chain_id": endpoint.chain_id,
                    "last_processed_block": block,
                })
            })
            .collect();
        let body = serde_json::json!({
            "transfers": counts,
            "total": counts.total(),
            "chains": chains,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("transfers:");
    println!("  pending:   {}", counts.pending);
    println!("  submitted: {}", counts.submitted);
    println!("  released:  {}", counts.released);
    println!("  failed:    {}", counts.failed);
    println!("  total:     {}", counts.total());

    println!("cursors:");
    for (endpoint, block) in cursors {
        match block {
            Some(block) => println!("  {} ({}): {}", endpoint.name, endpoint.chain_id, block),
            None => println!("  {} ({}): not started", endpoint.name, endpoint.chain_id),
        }
    }
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,crossbridge_relayer=debug"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .with((!json).then(|| fmt::layer().with_target(true).with_thread_ids(true)))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
