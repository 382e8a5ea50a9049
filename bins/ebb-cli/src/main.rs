//! ebb-cli — audit client for an Ebb node.
//!
//! Queries ledger entries, chain verification, Merkle proofs, sentinel
//! alerts and node status over JSON-RPC. Saved proofs can be checked
//! offline against a published root without contacting the node.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ebb_core::constants::{DEFAULT_RPC_PORT, UNIT};
use ebb_node_lib::rpc::{EntryJson, NodeInfoJson, ProofJson, VerifyJson};
use ebb_sentinel::SentinelAlert;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};

/// Ebb ledger audit client.
#[derive(Parser)]
#[command(name = "ebb-cli")]
#[command(version, about = "Audit client for the Ebb distribution ledger")]
struct Cli {
    /// RPC endpoint of the node.
    #[arg(long, global = true, default_value_t = default_endpoint())]
    rpc_endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ledger entry for an epoch.
    Entry(EntryArgs),
    /// Show the latest ledger entry.
    Latest,
    /// Verify the hash chain over a range of epochs.
    Verify(VerifyArgs),
    /// Fetch a Merkle inclusion proof for a participant's reward.
    Proof(ProofArgs),
    /// Check a saved proof offline.
    CheckProof(CheckProofArgs),
    /// List sentinel alerts for a range of epochs.
    Alerts(AlertsArgs),
    /// Show node status.
    Info,
    /// Ask the node to re-read its policy.
    ReloadPolicy,
}

#[derive(Args)]
struct EntryArgs {
    /// Epoch number.
    epoch: u64,
}

#[derive(Args)]
struct VerifyArgs {
    /// First epoch (default: genesis).
    #[arg(long)]
    from: Option<u64>,

    /// Last epoch (default: tip).
    #[arg(long)]
    to: Option<u64>,
}

#[derive(Args)]
struct ProofArgs {
    /// Epoch number.
    epoch: u64,

    /// Participant id.
    participant: String,

    /// Write the proof JSON to this file.
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct CheckProofArgs {
    /// Proof JSON file produced by `proof --out`.
    file: PathBuf,

    /// Expected root (hex). Defaults to the root stored in the proof.
    #[arg(long)]
    root: Option<String>,
}

#[derive(Args)]
struct AlertsArgs {
    /// First epoch.
    #[arg(long, default_value_t = 0)]
    from: u64,

    /// Last epoch.
    #[arg(long, default_value_t = u64::MAX)]
    to: u64,
}

fn default_endpoint() -> String {
    format!("http://127.0.0.1:{DEFAULT_RPC_PORT}")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let endpoint = cli.rpc_endpoint;
    match cli.command {
        Commands::CheckProof(args) => check_proof(args),
        Commands::Entry(args) => show_entry(&connect(&endpoint)?, args).await,
        Commands::Latest => show_latest(&connect(&endpoint)?).await,
        Commands::Verify(args) => verify_chain(&connect(&endpoint)?, args).await,
        Commands::Proof(args) => fetch_proof(&connect(&endpoint)?, args).await,
        Commands::Alerts(args) => show_alerts(&connect(&endpoint)?, args).await,
        Commands::Info => show_info(&connect(&endpoint)?).await,
        Commands::ReloadPolicy => reload_policy(&connect(&endpoint)?).await,
    }
}

fn connect(endpoint: &str) -> Result<HttpClient> {
    HttpClientBuilder::default()
        .build(endpoint)
        .context("Failed to connect to RPC")
}

fn format_amount(amount: u64) -> String {
    format!("{:.8} EBB", amount as f64 / UNIT as f64)
}

fn print_entry(entry: &EntryJson) {
    println!("\n=== EPOCH {} ===", entry.epoch_number);
    println!("Timestamp:   {}", entry.timestamp);
    println!("Distributed: {}", format_amount(entry.total_distributed));
    println!("Entry hash:  {}", entry.entry_hash);
    println!("Prev hash:   {}", entry.prev_hash);
    println!("Merkle root: {}", entry.merkle_root);
    println!("\nPools:");
    for (name, amount) in &entry.pool_allocations {
        println!("  {name:<12} {}", format_amount(*amount));
    }
    println!("\nRewards ({}):", entry.participant_rewards.len());
    for (id, amount) in &entry.participant_rewards {
        println!("  {id:<24} {}", format_amount(*amount));
    }
}

async fn show_entry(client: &HttpClient, args: EntryArgs) -> Result<()> {
    let mut params = ArrayParams::new();
    params.insert(args.epoch)?;
    let entry: EntryJson = client
        .request("getentry", params)
        .await
        .with_context(|| format!("RPC getentry failed for epoch {}", args.epoch))?;
    print_entry(&entry);
    Ok(())
}

async fn show_latest(client: &HttpClient) -> Result<()> {
    let entry: Option<EntryJson> = client
        .request("getlatestentry", ArrayParams::new())
        .await
        .context("RPC getlatestentry failed")?;
    match entry {
        Some(entry) => print_entry(&entry),
        None => println!("Ledger is empty"),
    }
    Ok(())
}

async fn verify_chain(client: &HttpClient, args: VerifyArgs) -> Result<()> {
    let mut params = ArrayParams::new();
    params.insert(args.from)?;
    params.insert(args.to)?;
    let result: VerifyJson = client
        .request("verifychain", params)
        .await
        .context("RPC verifychain failed")?;

    if result.valid {
        println!("Chain valid for epochs {}..={}", result.from, result.to);
        Ok(())
    } else {
        bail!(
            "Chain integrity failure at epoch {}: {}",
            result.failed_epoch.unwrap_or(result.from),
            result.error.unwrap_or_default()
        );
    }
}

async fn fetch_proof(client: &HttpClient, args: ProofArgs) -> Result<()> {
    let mut params = ArrayParams::new();
    params.insert(args.epoch)?;
    params.insert(args.participant.clone())?;
    let proof: ProofJson = client
        .request("getmerkleproof", params)
        .await
        .with_context(|| {
            format!(
                "RPC getmerkleproof failed for {} in epoch {}",
                args.participant, args.epoch
            )
        })?;

    let valid = proof.verify().map_err(anyhow::Error::msg)?;
    let json = serde_json::to_string_pretty(&proof)?;
    match args.out {
        Some(path) => {
            std::fs::write(&path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Proof saved to: {}", path.display());
        }
        None => println!("{json}"),
    }
    println!(
        "{} earned {} in epoch {} (proof {})",
        proof.participant_id,
        format_amount(proof.amount),
        proof.epoch_number,
        if valid { "valid" } else { "INVALID" }
    );
    Ok(())
}

/// Load a saved proof and check it against `root`, or its own root.
fn load_and_check(path: &Path, root: Option<&str>) -> Result<(ProofJson, bool)> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut proof: ProofJson =
        serde_json::from_str(&contents).context("Proof file is not valid proof JSON")?;
    if let Some(root) = root {
        proof.merkle_root = root.to_string();
    }
    let valid = proof.verify().map_err(anyhow::Error::msg)?;
    Ok((proof, valid))
}

fn check_proof(args: CheckProofArgs) -> Result<()> {
    let (proof, valid) = load_and_check(&args.file, args.root.as_deref())?;
    if !valid {
        bail!(
            "Proof does NOT match root {} for epoch {}",
            proof.merkle_root,
            proof.epoch_number
        );
    }
    println!(
        "Proof valid: {} earned {} in epoch {} (root {})",
        proof.participant_id,
        format_amount(proof.amount),
        proof.epoch_number,
        proof.merkle_root
    );
    Ok(())
}

async fn show_alerts(client: &HttpClient, args: AlertsArgs) -> Result<()> {
    let mut params = ArrayParams::new();
    params.insert(args.from)?;
    params.insert(args.to)?;
    let alerts: Vec<SentinelAlert> = client
        .request("getalerts", params)
        .await
        .context("RPC getalerts failed")?;

    if alerts.is_empty() {
        println!("No alerts");
        return Ok(());
    }
    for alert in &alerts {
        println!(
            "epoch {:>6}  {:<14} severity {:>5} bps  {} participant(s)  -> {}",
            alert.epoch_number,
            alert.alert_type.to_string(),
            alert.severity_bps,
            alert.participant_ids.len(),
            alert.recommended_action
        );
    }
    Ok(())
}

async fn show_info(client: &HttpClient) -> Result<()> {
    let info: NodeInfoJson = client
        .request("getinfo", ArrayParams::new())
        .await
        .context("RPC getinfo failed")?;

    println!("\n=== NODE INFO ===");
    println!("Next epoch:       {}", info.next_epoch);
    println!("Tip hash:         {}", if info.tip_hash.is_empty() { "-" } else { &info.tip_hash });
    println!("State:            {}", info.state);
    match info.halted_at {
        Some(epoch) => println!("Ledger:           HALTED at epoch {epoch}"),
        None => println!("Ledger:           ok"),
    }
    println!("Wallets:          {}", info.wallets);
    println!("Network reserve:  {}", format_amount(info.network_reserve));
    println!("Treasury reserve: {}", format_amount(info.treasury_reserve));
    println!("Alerts:           {}", info.alerts);
    Ok(())
}

async fn reload_policy(client: &HttpClient) -> Result<()> {
    let _: bool = client
        .request("reloadpolicy", ArrayParams::new())
        .await
        .context("RPC reloadpolicy failed")?;
    println!("Policy reloaded");
    Ok(())
}
