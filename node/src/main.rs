use anyhow::{Context as _, Result};
use clap::Parser;
use commonware_runtime::{tokio, Metrics, Runner};
use lattice_node::{
    driver,
    engine::{self, Engine, GossipStrategy},
    orderer::ValidationMode,
    Config, CommitteeFile,
};
use lattice_types::MAX_UNIT_TRANSACTIONS;
use std::{net::SocketAddr, path::PathBuf, str::FromStr};
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "node")]
#[command(about = "A process participating in a lattice committee.")]
struct Args {
    /// Our process id (index into the committee file).
    #[arg(long)]
    id: u32,

    /// Path to the shared committee YAML file.
    #[arg(long)]
    committee: PathBuf,

    /// Path to our secret YAML config.
    #[arg(long)]
    config: PathBuf,

    /// How transfers reach the ledger: none, snap, or linear.
    #[arg(long, default_value = "linear")]
    mode: ValidationMode,

    /// How sync targets are picked: uniform or non-recent.
    #[arg(long, default_value = "uniform")]
    gossip: GossipStrategy,

    /// Stop creating units after this many.
    #[arg(long)]
    unit_limit: Option<u64>,

    /// Shut down once a unit of this level is admitted.
    #[arg(long)]
    level_limit: Option<u64>,

    /// Override the sync listen address (defaults to our committee entry).
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the ingress listen address (defaults to our committee entry).
    #[arg(long)]
    ingress: Option<SocketAddr>,
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    let args = Args::parse();

    let config_contents = std::fs::read_to_string(&args.config)
        .with_context(|| format!("Could not read config file {}", args.config.display()))?;
    let config: Config =
        serde_yaml::from_str(&config_contents).context("Could not parse config file")?;

    let committee_contents = std::fs::read_to_string(&args.committee)
        .with_context(|| format!("Could not read committee file {}", args.committee.display()))?;
    let committee_file: CommitteeFile =
        serde_yaml::from_str(&committee_contents).context("Could not parse committee file")?;

    // Configure telemetry before touching anything that logs.
    let log_level = Level::from_str(&config.log_level).context("Invalid log level")?;
    tracing_subscriber::fmt().with_max_level(log_level).init();
    info!(config = ?config.redacted_debug(), "loaded config file");

    let validated = config
        .validate(committee_file.size())
        .context("Config is invalid")?;
    let committee = committee_file
        .into_committee(args.id, &validated)
        .context("Committee does not match our keys")?;
    let endowments = committee_file
        .endowments()
        .context("Committee endowments are invalid")?;
    let addresses = committee_file.addresses();
    let listen = args.listen.unwrap_or(addresses[args.id as usize]);
    let ingress = args
        .ingress
        .unwrap_or(committee_file.ingress_addresses()[args.id as usize]);
    info!(
        id = args.id,
        peers = addresses.len(),
        %listen,
        %ingress,
        mode = ?args.mode,
        gossip = ?args.gossip,
        "starting process"
    );

    // Initialize runtime
    let cfg = tokio::Config::default()
        .with_tcp_nodelay(Some(true))
        .with_worker_threads(validated.worker_threads);
    let executor = tokio::Runner::new(cfg);

    // Start runtime
    executor.start(|context| async move {
        let engine_cfg = engine::Config {
            driver: driver::Config {
                me: args.id,
                signer: validated.signer,
                share: validated.share,
                committee,
                mode: args.mode,
                endowments,
                n_parents: validated.n_parents,
                coin_level: validated.coin_level,
                create_period: validated.create_period,
                max_unit_transactions: MAX_UNIT_TRANSACTIONS,
                mempool_capacity: validated.mempool_capacity,
                mailbox_size: validated.mailbox_size,
                unit_limit: args.unit_limit,
                level_limit: args.level_limit,
                shutdown_grace: validated.shutdown_grace,
            },
            listen,
            ingress,
            gossip: args.gossip,
            sync_period: validated.sync_period,
            max_inbound_syncs: validated.max_inbound_syncs,
            max_frame: validated.max_frame,
        };

        let engine = match Engine::new(context.with_label("engine"), engine_cfg).await {
            Ok(engine) => engine,
            Err(err) => {
                error!(?err, "could not bind listeners");
                return;
            }
        };
        let summary = match engine.start(addresses).await {
            Ok(summary) => summary,
            Err(err) => {
                error!(?err, "engine failed");
                return;
            }
        };
        info!(
            units = summary.units,
            created = summary.created,
            max_level = ?summary.max_level,
            decided = summary.decided_levels,
            ordered = summary.order.len(),
            "process finished"
        );
    });

    Ok(())
}
