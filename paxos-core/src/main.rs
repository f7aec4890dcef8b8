use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use rand::Rng;
use tokio::net::TcpListener;
use tracing::{info, warn};

use paxos_core::config::{Config, DEFAULT_LOG_LEVEL, parse_acceptor_list};
use paxos_core::logging::init_tracing;
use paxos_core::storage::{FileStore, MemoryStore, RecordStore};
use paxos_core::transport::{TcpClient, tcp};
use paxos_core::{Acceptor, Proposer, ProposerConfig, RoundOutcome};

#[derive(Parser)]
#[clap(name = "paxos-node", about = "Single-decree Paxos acceptor and proposer")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve an acceptor over TCP
    Acceptor {
        /// address to listen on
        #[clap(long, default_value = "127.0.0.1:7001")]
        listen: String,

        /// keep records in this directory; in memory when omitted
        #[clap(long)]
        data_dir: Option<PathBuf>,

        #[clap(long, default_value = DEFAULT_LOG_LEVEL)]
        log_level: String,
    },
    /// Run one Paxos round for a key
    Propose {
        #[clap(long)]
        key: String,

        #[clap(long)]
        value: String,

        /// comma-separated acceptor addresses
        #[clap(long, conflicts_with = "config")]
        acceptors: Option<String>,

        /// path to a YAML config file
        #[clap(long)]
        config: Option<PathBuf>,

        /// overrides the config file
        #[clap(long)]
        proposer_id: Option<u16>,

        /// per-call timeout, overrides the config file
        #[clap(long)]
        timeout_ms: Option<u64>,

        /// extra rounds to run while the value is not decided
        #[clap(long, default_value_t = 0)]
        retries: u32,

        /// print the outcome as JSON
        #[clap(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Acceptor {
            listen,
            data_dir,
            log_level,
        } => {
            init_tracing(&log_level);
            match data_dir {
                Some(dir) => {
                    let store = FileStore::open(&dir)
                        .await
                        .with_context(|| format!("opening {}", dir.display()))?;
                    run_acceptor(&listen, store).await
                }
                None => run_acceptor(&listen, MemoryStore::new()).await,
            }
        }
        Command::Propose {
            key,
            value,
            acceptors,
            config,
            proposer_id,
            timeout_ms,
            retries,
            json,
        } => {
            let mut cfg = match (acceptors, config) {
                (Some(list), None) => Config {
                    proposer_id: 0,
                    rpc_timeout: ProposerConfig::default().rpc_timeout,
                    log_level: DEFAULT_LOG_LEVEL.to_string(),
                    acceptors: parse_acceptor_list(&list)?,
                },
                (None, Some(path)) => Config::load(&path)?,
                _ => bail!("either --acceptors or --config is required"),
            };
            if let Some(id) = proposer_id {
                cfg.proposer_id = id;
            }
            if let Some(ms) = timeout_ms {
                cfg.rpc_timeout = Duration::from_millis(ms);
            }
            init_tracing(&cfg.log_level);

            let outcome = run_proposer(&cfg, &key, &value, retries).await;
            if json {
                let report = serde_json::json!({
                    "key": key,
                    "decided": outcome.decided(),
                    "value": outcome.value().map(|v| v.to_string()),
                    "outcome": outcome,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match &outcome {
                    RoundOutcome::Decided { value, ballot } => {
                        println!("decided {} = {} ({})", key, value, ballot)
                    }
                    RoundOutcome::NotDecided(reason) => println!(
                        "not decided: {} phase got {} of {} needed",
                        reason.phase, reason.got, reason.needed
                    ),
                }
            }
            if !outcome.decided() {
                std::process::exit(2);
            }
            Ok(())
        }
    }
}

async fn run_acceptor<S: RecordStore + 'static>(listen: &str, store: S) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    let acceptor = Arc::new(Acceptor::new(listen, store));

    tokio::select! {
        _ = tcp::serve(listener, acceptor) => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

/// Runs up to `1 + retries` rounds. Each retry uses a fresh ballot, which the
/// proposer has already raised above any rejection it saw.
async fn run_proposer(cfg: &Config, key: &str, value: &str, retries: u32) -> RoundOutcome {
    let clients = cfg.acceptors.iter().map(TcpClient::new).collect();
    let proposer = Proposer::new(cfg.proposer_config(), clients);

    let mut attempt = 0;
    loop {
        let outcome = proposer.propose(key, value).await;
        if outcome.decided() || attempt >= retries {
            return outcome;
        }
        attempt += 1;

        // random pause so competing proposers stop colliding
        let pause = rand::rng().random_range(10..100);
        warn!(attempt, pause_ms = pause, "round not decided, retrying");
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }
}
