//! Key generation for a local committee.
//!
//! Usage: cargo run --bin generate-keys -- --nodes 4 --output configs/local
//!
//! This generates:
//! - nodeN.yaml files with the ed25519 key and the BLS threshold share
//! - committee.yaml with every member's addresses and public key, plus
//!   endowed test accounts for the submitter tool

use anyhow::{Context, Result};
use clap::Parser;
use commonware_codec::Encode;
use commonware_cryptography::{
    bls12381::{dkg::ops::generate_shares, primitives::variant::MinSig},
    ed25519::PrivateKey,
    PrivateKeyExt, Signer,
};
use commonware_utils::{hex, quorum};
use lattice_node::defaults::{
    DEFAULT_COIN_LEVEL, DEFAULT_CREATE_PERIOD_MS, DEFAULT_LOG_LEVEL, DEFAULT_MAILBOX_SIZE,
    DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_INBOUND_SYNCS, DEFAULT_MEMPOOL_CAPACITY,
    DEFAULT_N_PARENTS, DEFAULT_SYNC_PERIOD_MS, DEFAULT_WORKER_THREADS,
};
use rand::{rngs::StdRng, SeedableRng};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "generate-keys")]
#[command(about = "Generate keys and configs for a local committee")]
struct Args {
    /// Number of processes in the committee
    #[arg(short, long, default_value_t = 4)]
    nodes: u32,

    /// Output directory for configuration files
    #[arg(short, long, default_value = "configs/local")]
    output: PathBuf,

    /// Random seed for key generation (use different seeds for different networks)
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Base port for sync connections (process i listens on base_port + i)
    #[arg(long, default_value_t = 9000)]
    base_port: u16,

    /// Base port for transaction ingress (process i listens on base + i)
    #[arg(long, default_value_t = 9100)]
    ingress_base_port: u16,

    /// Number of endowed test accounts (seeds 1000, 1001, ...)
    #[arg(long, default_value_t = 16)]
    accounts: u32,

    /// Initial balance of each endowed account
    #[arg(long, default_value_t = 100_000)]
    balance: u64,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("generate-keys failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let n = args.nodes;
    let threshold = quorum(n);

    println!("Generating keys for a {n}-process committee");
    println!("  Threshold: {threshold} of {n} shares required");
    println!("  Output: {}", args.output.display());
    println!();

    // Use a deterministic RNG for reproducibility.
    // IMPORTANT: use different seeds for different environments!
    let mut rng = StdRng::seed_from_u64(args.seed);

    // The share at index i belongs to process i; ids are fixed by committee
    // file order, so no sorting happens anywhere.
    let (polynomial, shares) = generate_shares::<_, MinSig>(&mut rng, None, n, threshold);
    let polynomial_hex = hex(&polynomial.encode());

    fs::create_dir_all(&args.output).with_context(|| {
        format!(
            "Failed to create output directory {}",
            args.output.display()
        )
    })?;

    let mut committee = String::from("members:\n");
    for i in 0..n {
        let private = PrivateKey::from_seed(args.seed + i as u64);
        let public = private.public_key();

        let config = format!(
            r#"# Process {i} configuration
# Generated by generate-keys (seed: {seed})
# DO NOT commit private keys to version control!

private_key: "{private_key}"
share: "{share}"
polynomial: "{polynomial}"

log_level: "{log_level}"
worker_threads: {worker_threads}
create_period_ms: {create_period_ms}
sync_period_ms: {sync_period_ms}
max_inbound_syncs: {max_inbound_syncs}
mailbox_size: {mailbox_size}
mempool_capacity: {mempool_capacity}
max_frame_bytes: {max_frame_bytes}
n_parents: {n_parents}
coin_level: {coin_level}
"#,
            i = i,
            seed = args.seed,
            private_key = hex(&private.encode()),
            share = hex(&shares[i as usize].encode()),
            polynomial = polynomial_hex,
            log_level = DEFAULT_LOG_LEVEL,
            worker_threads = DEFAULT_WORKER_THREADS,
            create_period_ms = DEFAULT_CREATE_PERIOD_MS,
            sync_period_ms = DEFAULT_SYNC_PERIOD_MS,
            max_inbound_syncs = DEFAULT_MAX_INBOUND_SYNCS,
            mailbox_size = DEFAULT_MAILBOX_SIZE,
            mempool_capacity = DEFAULT_MEMPOOL_CAPACITY,
            max_frame_bytes = DEFAULT_MAX_FRAME_BYTES,
            n_parents = DEFAULT_N_PARENTS,
            coin_level = DEFAULT_COIN_LEVEL,
        );
        let config_path = args.output.join(format!("node{i}.yaml"));
        fs::write(&config_path, config)
            .with_context(|| format!("Failed to write config {}", config_path.display()))?;
        println!("Created: {}", config_path.display());

        committee.push_str(&format!(
            "  - address: \"127.0.0.1:{}\"\n    ingress: \"127.0.0.1:{}\"\n    public_key: \"{}\"\n",
            args.base_port + i as u16,
            args.ingress_base_port + i as u16,
            hex(&public.encode()),
        ));
    }

    // Endowed accounts for the submitter tool.
    committee.push_str("endowments:\n");
    for account in 0..args.accounts {
        let private = PrivateKey::from_seed(1_000 + account as u64);
        committee.push_str(&format!(
            "  - public_key: \"{}\"\n    balance: {}\n",
            hex(&private.public_key().encode()),
            args.balance,
        ));
    }

    let committee_path = args.output.join("committee.yaml");
    fs::write(&committee_path, committee)
        .with_context(|| format!("Failed to write committee file {}", committee_path.display()))?;
    println!("Created: {}", committee_path.display());

    println!();
    println!("Start process i with:");
    println!(
        "  cargo run --bin node -- --id i --committee {}/committee.yaml --config {}/nodei.yaml",
        args.output.display(),
        args.output.display()
    );

    Ok(())
}
