//! Stream signed transfer batches to a process's ingress port.
//!
//! Accounts are derived from seeds 1000, 1001, ... to match the endowments
//! written by generate-keys; each account sends transfers with consecutive
//! indices to the next account, round-robin.

use anyhow::{Context as _, Result};
use clap::Parser;
use commonware_codec::Encode;
use commonware_cryptography::{ed25519::PrivateKey, PrivateKeyExt, Signer};
use commonware_runtime::{tokio as runtime, Runner};
use lattice_node::sync::write_frame;
use lattice_types::{Transaction, TransactionBatch};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "submit-transactions")]
#[command(about = "Send signed transfer batches to an ingress port")]
struct Args {
    /// Ingress address of the target process
    #[arg(long)]
    ingress: SocketAddr,

    /// Number of endowed accounts to draw from (seeds 1000..)
    #[arg(long, default_value_t = 16)]
    accounts: u32,

    /// Transfers per batch
    #[arg(long, default_value_t = 32)]
    batch: usize,

    /// Total number of batches to send
    #[arg(long, default_value_t = 10)]
    batches: usize,

    /// Delay between batches, in milliseconds
    #[arg(long, default_value_t = 200)]
    period_ms: u64,

    /// Amount carried by every transfer
    #[arg(long, default_value_t = 1)]
    amount: u64,
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().init();

    let privates: Vec<PrivateKey> = (0..args.accounts as u64)
        .map(|account| PrivateKey::from_seed(1_000 + account))
        .collect();

    let executor = runtime::Runner::new(runtime::Config::default());
    executor.start(|_| async move {
        let result: Result<()> = async {
            let mut stream = TcpStream::connect(args.ingress)
                .await
                .with_context(|| format!("Could not connect to {}", args.ingress))?;

            let mut indices = vec![0u64; privates.len()];
            let mut cursor = 0usize;
            for batch_number in 0..args.batches {
                let mut transactions = Vec::with_capacity(args.batch);
                for _ in 0..args.batch {
                    let issuer = &privates[cursor];
                    let receiver = privates[(cursor + 1) % privates.len()].public_key();
                    transactions.push(Transaction::sign(
                        issuer,
                        indices[cursor],
                        receiver,
                        args.amount,
                    ));
                    indices[cursor] += 1;
                    cursor = (cursor + 1) % privates.len();
                }

                let batch = TransactionBatch { transactions };
                write_frame(&mut stream, batch.encode().as_ref())
                    .await
                    .context("Could not send batch")?;
                info!(batch = batch_number, size = args.batch, "batch sent");
                tokio::time::sleep(Duration::from_millis(args.period_ms)).await;
            }
            Ok(())
        }
        .await;
        if let Err(err) = result {
            eprintln!("{err:?}");
            std::process::exit(1);
        }
    });

    Ok(())
}
