//! w3feed - Web3 market and blockchain data from the command line
//!
//! Fetches OKLink chain data, market feeds, and token safety reports, printing
//! each result as pretty JSON on stdout. Logs go to stderr.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use w3feed::cache::{SweepHandle, TtlCache};
use w3feed::cli::{parse_exchange_arg, Cli, Command, RuntimeConfig};
use w3feed::data::dashboard::DASHBOARD_REFRESH_INTERVAL;
use w3feed::data::{Dashboard, MarketClient, OklinkClient, TokenCheckClient};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "w3feed=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Writes `value` as pretty JSON followed by a newline
fn write_json<W: Write, T: Serialize>(mut out: W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    out.flush()
}

/// Prints to stdout; a closed pipe is reported as an error instead of a panic
fn print_json<T: Serialize>(value: &T) -> Result<(), BoxError> {
    write_json(io::stdout().lock(), value)?;
    Ok(())
}

/// Runs one subcommand against the shared cache
async fn run(command: &Command, config: &RuntimeConfig, cache: &TtlCache) -> Result<(), BoxError> {
    let oklink = OklinkClient::new(config.oklink_key.clone(), cache.clone(), config.retry);
    let market = MarketClient::new(config.retry);

    match command {
        Command::Gas { chain } => print_json(&oklink.gas_fee(chain).await?.into_data()),
        Command::Reserves { exchange } => {
            let exchange = parse_exchange_arg(exchange)?;
            print_json(&oklink.exchange_reserves(exchange).await?.into_data())
        }
        Command::Hashrate => print_json(&oklink.hash_rate().await?),
        Command::ChainInfo => print_json(&oklink.blockchain_info().await?),
        Command::LargeTx { chain } => print_json(&oklink.large_transactions(chain).await?),
        Command::News => print_json(&market.news().await?),
        Command::Prices => print_json(&market.prices().await?),
        Command::FearGreed { limit } => print_json(&market.fear_greed(*limit).await?),
        Command::Rugcheck { mint } => {
            let checker = TokenCheckClient::new(config.retry);
            print_json(&checker.solana_report(mint).await?)
        }
        Command::EthCheck { address } => {
            let checker = TokenCheckClient::new(config.retry);
            print_json(&checker.evm_security(address).await?)
        }
        Command::Dashboard { exchange, watch } => {
            let dashboard = Dashboard::new(oklink, market).with_exchange(parse_exchange_arg(exchange)?);
            if !*watch {
                return print_json(&dashboard.load().await);
            }

            // One listener for the whole session, so a Ctrl-C during a load is not lost
            let interrupted = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
                info!("interrupted, stopping dashboard");
            };
            dashboard
                .watch(DASHBOARD_REFRESH_INTERVAL, interrupted, |snapshot| {
                    print_json(snapshot)?;
                    debug!(cached = cache.len(), "dashboard refreshed");
                    Ok::<_, BoxError>(())
                })
                .await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match RuntimeConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    let cache = TtlCache::with_config(config.cache.clone());
    let sweeper = config
        .cache
        .sweep_interval
        .map(|interval| SweepHandle::spawn(cache.clone(), interval));

    let result = run(&cli.command, &config, &cache).await;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
