//! flowkernel-node — the flowkernel reference node binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the persistent state database
//!   2. Resolve the controller account and this instance's domain descriptor
//!   3. Wire every kernel component against the shared database
//!   4. Start the JSON-RPC 2.0 server
//!   5. Run until interrupted
//!
//! Every write to kernel state happens synchronously inside an RPC handler
//! (spec §4); unlike a consensus ledger this node has no inbound-transaction
//! queue or block-production loop to run afterward.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use flowkernel_channel::FlowChannel;
use flowkernel_clock::UniversalClock;
use flowkernel_consent::ConsentRegistry;
use flowkernel_core::Id;
use flowkernel_crypto::{keccak256, DomainDescriptor, Keypair};
use flowkernel_executor::PullExecutor;
use flowkernel_intent::{DomainDirectory, IntentRegistry, Rebalancer};
use flowkernel_policy::PolicyEnforcer;
use flowkernel_router::{AdaptiveRouter, SettlementMesh};
use flowkernel_rpc::{RpcServer, RpcServerState};
use flowkernel_storage::Database;
use flowkernel_token::{SimpleTokenLedger, TokenLedger};

#[derive(Parser, Debug)]
#[command(
    name = "flowkernel-node",
    version,
    about = "flowkernel node — a permissioned-pull value-flow protocol kernel"
)]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.flowkernel/data")]
    data_dir: PathBuf,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8645")]
    rpc_addr: SocketAddr,

    /// Controller account for every controller-gated component (consent
    /// trust list, domain directory, router, mesh). If omitted, an
    /// ephemeral controller keypair is generated — fine for local
    /// development, but every restart then produces a different
    /// controller and orphans any state from the previous run.
    #[arg(long)]
    controller: Option<String>,

    /// Domain host id bound into every verified signature's typed digest.
    /// If omitted, it is derived deterministically from the data
    /// directory's canonical path, so restarts against the same data
    /// directory keep verifying existing signatures.
    #[arg(long)]
    host_id: Option<String>,

    /// Epoch length in seconds for `PolicyEnforcer`'s per-epoch budgets.
    #[arg(long, default_value_t = 86_400)]
    epoch_length: u64,

    /// Epoch genesis timestamp. If omitted, the first run picks the
    /// current time and persists it; later runs reuse the persisted value.
    #[arg(long)]
    genesis_ts: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowkernel=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("flowkernel node starting");

    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Database::open(&data_dir).context("opening state database")?;

    let controller = match &args.controller {
        Some(s) => parse_id(s)?,
        None => {
            let kp = Keypair::generate();
            warn!(account_id = %kp.account_id().to_hex(), "no --controller given; generated an ephemeral controller — DO NOT USE IN PRODUCTION");
            kp.account_id()
        }
    };

    let host_id = match &args.host_id {
        Some(s) => parse_id(s)?,
        None => {
            let canonical = data_dir.canonicalize().unwrap_or(data_dir.clone());
            Id::from(keccak256(canonical.to_string_lossy().as_bytes()))
        }
    };
    let domain = DomainDescriptor {
        host_id,
        verifying_instance: controller,
    };
    info!(controller = %controller.to_hex(), host_id = %host_id.to_hex(), "domain resolved");

    let genesis_ts = resolve_genesis_ts(&db, args.genesis_ts)?;
    let clock = UniversalClock::new(args.epoch_length, genesis_ts);

    // Reference in-memory token ledger (spec §6): a production deployment
    // backs `TokenLedger` with its own persistent, authenticated balance
    // store, so balances here do not survive a restart.
    let token: Arc<dyn TokenLedger> = Arc::new(SimpleTokenLedger::new());

    let consent = Arc::new(ConsentRegistry::open(&db, controller)?);
    let policy = Arc::new(PolicyEnforcer::open(&db, clock)?);
    let channel = Arc::new(FlowChannel::open_database(&db, Arc::clone(&token), Some(Arc::clone(&policy)))?);
    let executor = Arc::new(PullExecutor::new(domain, Arc::clone(&consent), Arc::clone(&token)));
    let intent_registry = Arc::new(IntentRegistry::open(&db, domain, controller)?);
    let directory = Arc::new(DomainDirectory::open(&db, controller)?);
    let rebalancer = Arc::new(Rebalancer::new(
        controller,
        Arc::clone(&intent_registry),
        Arc::clone(&directory),
        Arc::clone(&consent),
    ));
    let router = Arc::new(AdaptiveRouter::new(controller, Arc::clone(&channel)));
    let mesh = Arc::new(SettlementMesh::new(controller, Arc::clone(&router)));

    // No source-pull adapters are wired by default: an adapter is a live
    // `Arc<dyn SourcePullAdapter>` bound to one concrete downstream ledger,
    // which this generic reference node has none of out of the box.
    // Operators embedding this node in a real deployment add their
    // adapters here, keyed by the domain id they serve.
    let adapters = HashMap::new();

    let rpc_state = Arc::new(RpcServerState {
        domain,
        consent,
        executor,
        channel,
        policy,
        intent_registry,
        directory,
        rebalancer,
        router,
        mesh,
        adapters,
        token: Arc::clone(&token),
    });
    let _rpc_handle = RpcServer::new(rpc_state)
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    info!(addr = %args.rpc_addr, "node ready");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    Ok(())
}

fn resolve_genesis_ts(db: &Database, override_ts: Option<u64>) -> anyhow::Result<u64> {
    if let Some(ts) = override_ts {
        db.put_meta("clock_genesis_ts", &ts.to_be_bytes())?;
        return Ok(ts);
    }
    if let Some(bytes) = db.get_meta("clock_genesis_ts")? {
        if bytes.len() == 8 {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&bytes);
            return Ok(u64::from_be_bytes(arr));
        }
    }
    let now = chrono::Utc::now().timestamp() as u64;
    db.put_meta("clock_genesis_ts", &now.to_be_bytes())?;
    Ok(now)
}

fn parse_id(s: &str) -> anyhow::Result<Id> {
    Id::from_hex(s).map_err(|e| anyhow::anyhow!("invalid id {s}: {e}"))
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
