//! flowkernel-wallet
//!
//! CLI wallet for the flowkernel protocol. Manages secp256k1 keypairs,
//! signs `Authorization` and `FlowIntent` envelopes, and submits them to
//! a running node via JSON-RPC.
//!
//! Usage:
//!   flowkernel-wallet keygen    [--keyfile <path>]
//!   flowkernel-wallet info      [--rpc <url>]
//!   flowkernel-wallet sign-authorization --grantee <id> --token <id> --max-per-pull <amount> \
//!       --valid-after <ts> --valid-before <ts> --nonce <n> --out <path> [--rpc <url>] [--keyfile <path>]
//!   flowkernel-wallet pull-direct --auth-file <path> --amount <amount> [--rpc <url>] [--keyfile <path>]
//!   flowkernel-wallet sign-intent --executor <id> --src-domain <id> --dst-domain <id> --token <id> \
//!       --max-total <amount> --valid-after <ts> --valid-before <ts> --nonce <n> \
//!       --metadata-hash <id> --out <path> [--rpc <url>] [--keyfile <path>]
//!   flowkernel-wallet intent-consume --intent-file <path> --amount <amount> [--rpc <url>] [--keyfile <path>]
//!   flowkernel-wallet execute-intent --intent-file <path> --amount <amount> [--rpc <url>] [--keyfile <path>]
//!   flowkernel-wallet channel-open --channel-id <id> --grantee <id> --token <id> \
//!       --rate-per-second <amount> --max-balance <amount> [--policy-ref <id>] [--rpc <url>] [--keyfile <path>]
//!   flowkernel-wallet channel-pull --channel-id <id> --to <id> --amount <amount> [--rpc <url>] [--keyfile <path>]
//!   flowkernel-wallet channel-claimable --channel-id <id> [--rpc <url>]
//!   flowkernel-wallet consent-pulled-total --auth-hash <hex>

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use flowkernel_core::{Amount, Authorization, FlowIntent, Id};
use flowkernel_crypto::{struct_hash, typed_digest, DomainDescriptor, Keypair};
use flowkernel_rpc::{RpcAuthorization, RpcFlowIntent};

mod rpc_client;
use rpc_client::WalletRpcClient;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "flowkernel-wallet",
    version,
    about = "flowkernel wallet — sign and submit permissioned pull authorizations"
)]
struct Args {
    /// Path to the keyfile (JSON).
    #[arg(long, global = true, default_value = "~/.flowkernel/wallet.json")]
    keyfile: PathBuf,

    /// Node RPC endpoint.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8645")]
    rpc: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new secp256k1 keypair and save to the keyfile.
    Keygen,

    /// Print node version and domain info.
    Info,

    /// Sign an Authorization (this wallet's account is the grantor) and
    /// write it as JSON to --out.
    SignAuthorization {
        #[arg(long)]
        grantee: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        max_per_pull: String,
        #[arg(long)]
        valid_after: u64,
        #[arg(long)]
        valid_before: u64,
        #[arg(long)]
        nonce: u64,
        #[arg(long)]
        out: PathBuf,
    },

    /// Submit a signed Authorization to the node as a direct pull.
    PullDirect {
        #[arg(long)]
        auth_file: PathBuf,
        #[arg(long)]
        amount: String,
    },

    /// Sign a FlowIntent (this wallet's account is the grantor) and write
    /// the intent plus its detached signature as JSON to --out.
    SignIntent {
        #[arg(long)]
        executor: String,
        #[arg(long)]
        src_domain: String,
        #[arg(long)]
        dst_domain: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        max_total: String,
        #[arg(long)]
        valid_after: u64,
        #[arg(long)]
        valid_before: u64,
        #[arg(long)]
        nonce: u64,
        #[arg(long)]
        metadata_hash: String,
        #[arg(long)]
        out: PathBuf,
    },

    /// Submit a signed FlowIntent for same-domain metering (no rebalancer
    /// source-pull leg).
    IntentConsume {
        #[arg(long)]
        intent_file: PathBuf,
        #[arg(long)]
        amount: String,
    },

    /// Submit a signed FlowIntent for cross-domain execution via the
    /// node's registered source-pull adapter.
    ExecuteIntent {
        #[arg(long)]
        intent_file: PathBuf,
        #[arg(long)]
        amount: String,
    },

    /// Open a rate-limited flow channel as the grantor.
    ChannelOpen {
        #[arg(long)]
        channel_id: String,
        #[arg(long)]
        grantee: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        rate_per_second: String,
        #[arg(long)]
        max_balance: String,
        #[arg(long)]
        policy_ref: Option<String>,
    },

    /// Pull from an open channel as the grantee.
    ChannelPull {
        #[arg(long)]
        channel_id: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
    },

    /// Query a channel's currently claimable balance.
    ChannelClaimable {
        #[arg(long)]
        channel_id: String,
    },

    /// Query the cumulative amount pulled under an Authorization.
    ConsentPulledTotal {
        #[arg(long)]
        auth_hash: String,
    },

    /// Trust or untrust an executor account to record pulls. Caller must
    /// be the node's configured controller.
    ConsentSetTrustedExecutor {
        #[arg(long)]
        executor: String,
        #[arg(long)]
        trusted: bool,
    },
}

// ── Keyfile ───────────────────────────────────────────────────────────────────

/// On-disk keyfile format. The raw scalar is stored hex-encoded; callers
/// are expected to keep the keyfile off shared or networked storage.
#[derive(Serialize, Deserialize)]
struct WalletKeyfile {
    account_id: String,
    secret_hex: String,
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,flowkernel_wallet=info")
        .init();

    let args = Args::parse();
    let keyfile = expand_tilde(&args.keyfile);
    let client = WalletRpcClient::new(&args.rpc);
    let now = chrono::Utc::now().timestamp() as u64;

    match args.command {
        Command::Keygen => cmd_keygen(&keyfile),

        Command::Info => {
            let info = client.get_version().await?;
            println!("Node version:        {}", info.node_version);
            println!("Protocol version:    {}", info.protocol_version);
            println!("Domain host id:      {}", info.domain_host_id);
            println!("Domain verifying id: {}", info.domain_verifying_instance);
            Ok(())
        }

        Command::SignAuthorization {
            grantee,
            token,
            max_per_pull,
            valid_after,
            valid_before,
            nonce,
            out,
        } => {
            let kp = load_keypair(&keyfile)?;
            let domain = fetch_domain(&client).await?;

            let mut auth = Authorization {
                grantor: kp.account_id(),
                grantee: parse_id(&grantee)?,
                token: parse_id(&token)?,
                max_per_pull: parse_amount(&max_per_pull)?,
                valid_after,
                valid_before,
                nonce,
                signature: flowkernel_core::Signature::from_bytes([0u8; 65]),
            };
            let digest = typed_digest(&domain, struct_hash(&auth.core().canonical_bytes()));
            auth.signature = kp.sign_prehash(digest);

            let rpc_auth = RpcAuthorization {
                grantor: auth.grantor.to_hex(),
                grantee: auth.grantee.to_hex(),
                token: auth.token.to_hex(),
                max_per_pull: auth.max_per_pull.to_string(),
                valid_after: auth.valid_after,
                valid_before: auth.valid_before,
                nonce: auth.nonce,
                signature: hex::encode(auth.signature.0),
            };
            std::fs::write(&out, serde_json::to_string_pretty(&rpc_auth)?)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("Signed authorization written to {}", out.display());
            Ok(())
        }

        Command::PullDirect { auth_file, amount } => {
            let kp = load_keypair(&keyfile)?;
            let json = std::fs::read_to_string(&auth_file).with_context(|| format!("reading {}", auth_file.display()))?;
            let auth: RpcAuthorization = serde_json::from_str(&json).context("parsing authorization file")?;
            let cumulative = client.pull_direct(&kp.account_id().to_hex(), &auth, &amount, now).await?;
            println!("Pull executed. Cumulative pulled under this authorization: {}", cumulative);
            Ok(())
        }

        Command::SignIntent {
            executor,
            src_domain,
            dst_domain,
            token,
            max_total,
            valid_after,
            valid_before,
            nonce,
            metadata_hash,
            out,
        } => {
            let kp = load_keypair(&keyfile)?;
            let domain = fetch_domain(&client).await?;

            let intent = FlowIntent {
                grantor: kp.account_id(),
                executor: parse_id(&executor)?,
                src_domain: parse_id(&src_domain)?,
                dst_domain: parse_id(&dst_domain)?,
                token: parse_id(&token)?,
                max_total: parse_amount(&max_total)?,
                valid_after,
                valid_before,
                nonce,
                metadata_hash: parse_id(&metadata_hash)?,
            };
            let digest = typed_digest(&domain, struct_hash(&intent.canonical_bytes()));
            let signature = kp.sign_prehash(digest);

            let rpc_intent = RpcFlowIntent {
                grantor: intent.grantor.to_hex(),
                executor: intent.executor.to_hex(),
                src_domain: intent.src_domain.to_hex(),
                dst_domain: intent.dst_domain.to_hex(),
                token: intent.token.to_hex(),
                max_total: intent.max_total.to_string(),
                valid_after: intent.valid_after,
                valid_before: intent.valid_before,
                nonce: intent.nonce,
                metadata_hash: intent.metadata_hash.to_hex(),
            };
            let bundle = SignedIntentFile {
                intent: rpc_intent,
                signature: hex::encode(signature.0),
            };
            std::fs::write(&out, serde_json::to_string_pretty(&bundle)?)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("Signed intent written to {}", out.display());
            Ok(())
        }

        Command::IntentConsume { intent_file, amount } => {
            let kp = load_keypair(&keyfile)?;
            let bundle = load_signed_intent(&intent_file)?;
            let h = client
                .intent_verify_and_consume(&kp.account_id().to_hex(), &bundle.intent, &bundle.signature, &amount, now)
                .await?;
            println!("Intent consumed. intent_hash={}", h);
            Ok(())
        }

        Command::ExecuteIntent { intent_file, amount } => {
            let kp = load_keypair(&keyfile)?;
            let bundle = load_signed_intent(&intent_file)?;
            let h = client
                .rebalancer_execute_flow_intent(&kp.account_id().to_hex(), &bundle.intent, &bundle.signature, &amount, now)
                .await?;
            println!("Intent executed. intent_hash={}", h);
            Ok(())
        }

        Command::ChannelOpen {
            channel_id,
            grantee,
            token,
            rate_per_second,
            max_balance,
            policy_ref,
        } => {
            let kp = load_keypair(&keyfile)?;
            client
                .channel_open(
                    &kp.account_id().to_hex(),
                    &channel_id,
                    &grantee,
                    &token,
                    &rate_per_second,
                    &max_balance,
                    policy_ref.as_deref(),
                    now,
                )
                .await?;
            println!("Channel {} opened.", channel_id);
            Ok(())
        }

        Command::ChannelPull { channel_id, to, amount } => {
            let kp = load_keypair(&keyfile)?;
            client.channel_pull(&kp.account_id().to_hex(), &channel_id, &to, &amount, now).await?;
            println!("Pulled {} from channel {}.", amount, channel_id);
            Ok(())
        }

        Command::ChannelClaimable { channel_id } => {
            let result = client.channel_claimable(&channel_id, now).await?;
            println!("Channel {} claimable: {}", result.channel_id, result.claimable);
            Ok(())
        }

        Command::ConsentPulledTotal { auth_hash } => {
            let total = client.consent_pulled_total(&auth_hash).await?;
            println!("Pulled total under {}: {}", auth_hash, total);
            Ok(())
        }

        Command::ConsentSetTrustedExecutor { executor, trusted } => {
            let kp = load_keypair(&keyfile)?;
            client.consent_set_trusted_executor(&kp.account_id().to_hex(), &executor, trusted).await?;
            println!("Executor {} trusted={}", executor, trusted);
            Ok(())
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SignedIntentFile {
    intent: RpcFlowIntent,
    signature: String,
}

fn load_signed_intent(path: &PathBuf) -> anyhow::Result<SignedIntentFile> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).context("parsing intent file")
}

async fn fetch_domain(client: &WalletRpcClient) -> anyhow::Result<DomainDescriptor> {
    let info = client.get_version().await?;
    Ok(DomainDescriptor {
        host_id: parse_id(&info.domain_host_id)?,
        verifying_instance: parse_id(&info.domain_verifying_instance)?,
    })
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_keygen(keyfile: &PathBuf) -> anyhow::Result<()> {
    if keyfile.exists() {
        bail!("Keyfile {} already exists. Delete it first to generate a new key.", keyfile.display());
    }
    if let Some(parent) = keyfile.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let kp = Keypair::generate();
    let file = WalletKeyfile {
        account_id: kp.account_id().to_hex(),
        secret_hex: hex::encode(kp.to_raw_bytes()),
    };
    std::fs::write(keyfile, serde_json::to_string_pretty(&file)?)
        .with_context(|| format!("writing keyfile to {}", keyfile.display()))?;

    println!("Generated new keypair.");
    println!("Account ID: {}", file.account_id);
    println!("Keyfile:    {}", keyfile.display());
    println!("\nBACK UP YOUR KEYFILE. Loss = permanent loss of the ability to sign.");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_keypair(keyfile: &PathBuf) -> anyhow::Result<Keypair> {
    let json = std::fs::read_to_string(keyfile).with_context(|| format!("reading keyfile {}", keyfile.display()))?;
    let file: WalletKeyfile = serde_json::from_str(&json).context("parsing keyfile — is it a valid flowkernel keyfile?")?;
    let bytes = hex::decode(&file.secret_hex).context("decoding keyfile secret")?;
    if bytes.len() != 32 {
        bail!("keyfile secret must be 32 bytes");
    }
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&bytes);
    Keypair::from_raw(raw).map_err(|e| anyhow::anyhow!("restoring keypair: {e}"))
}

fn parse_id(s: &str) -> anyhow::Result<Id> {
    Id::from_hex(s).map_err(|e| anyhow::anyhow!("invalid id {s}: {e}"))
}

fn parse_amount(s: &str) -> anyhow::Result<Amount> {
    s.parse::<Amount>().map_err(|e| anyhow::anyhow!("invalid amount {s}: {e}"))
}

fn expand_tilde(path: &PathBuf) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.clone()
}
