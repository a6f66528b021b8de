//! Wires the driver to the outside world.
//!
//! Owns the TCP listeners, runs the gossip accept loop, the periodic gossip
//! initiator, and the transaction ingress, all funneling into the driver's
//! mailbox. The engine stops (and tears the auxiliary tasks down) when the
//! driver does.

use crate::{
    driver::{Actor, Config as DriverConfig, Mailbox, Summary},
    sync,
};
use commonware_codec::DecodeExt;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use lattice_types::TransactionBatch;
use rand::{CryptoRng, Rng};
use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// How the gossip initiator picks its next target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GossipStrategy {
    /// Uniform over all peers.
    UniformRandom,
    /// Uniform over peers we have not reached out to recently.
    NonRecentRandom,
}

impl FromStr for GossipStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(Self::UniformRandom),
            "non-recent" => Ok(Self::NonRecentRandom),
            other => Err(format!("unknown gossip strategy: {other}")),
        }
    }
}

/// Configuration for the [Engine].
pub struct Config {
    pub driver: DriverConfig,

    /// Where to accept sync connections.
    pub listen: SocketAddr,
    /// Where to accept transaction batches.
    pub ingress: SocketAddr,

    pub gossip: GossipStrategy,
    pub sync_period: Duration,
    /// Inbound syncs beyond this bound are dropped immediately.
    pub max_inbound_syncs: usize,
    pub max_frame: usize,
}

pub struct Engine<E: Clock + Rng + CryptoRng + Spawner + Metrics + Clone> {
    context: E,
    actor: Actor<E>,
    mailbox: Mailbox,

    me: u32,
    gossip: GossipStrategy,
    sync_period: Duration,
    max_inbound_syncs: usize,
    max_frame: usize,

    sync_listener: TcpListener,
    ingress_listener: TcpListener,
}

impl<E: Clock + Rng + CryptoRng + Spawner + Metrics + Clone> Engine<E> {
    /// Bind the listeners and assemble the engine.
    pub async fn new(context: E, cfg: Config) -> std::io::Result<Self> {
        let me = cfg.driver.me;
        let sync_listener = TcpListener::bind(cfg.listen).await?;
        let ingress_listener = TcpListener::bind(cfg.ingress).await?;
        let (actor, mailbox) = Actor::new(context.with_label("driver"), cfg.driver);
        Ok(Self {
            context,
            actor,
            mailbox,
            me,
            gossip: cfg.gossip,
            sync_period: cfg.sync_period,
            max_inbound_syncs: cfg.max_inbound_syncs,
            max_frame: cfg.max_frame,
            sync_listener,
            ingress_listener,
        })
    }

    /// The bound sync address (useful when listening on port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.sync_listener.local_addr()
    }

    pub fn ingress_addr(&self) -> std::io::Result<SocketAddr> {
        self.ingress_listener.local_addr()
    }

    /// Start everything. `addresses` is the committee's sync address book,
    /// indexed by process id.
    pub fn start(self, addresses: Vec<SocketAddr>) -> Handle<Summary> {
        self.context.clone().spawn(|_| self.run(addresses))
    }

    async fn run(self, addresses: Vec<SocketAddr>) -> Summary {
        let driver = self.actor.start();

        let listener = self.context.with_label("listener").spawn({
            let mailbox = self.mailbox.clone();
            let peers: Vec<IpAddr> = addresses.iter().map(|address| address.ip()).collect();
            let me = self.me;
            let bound = self.max_inbound_syncs;
            let max_frame = self.max_frame;
            let sync_listener = self.sync_listener;
            move |context| listen(context, sync_listener, peers, me, bound, max_frame, mailbox)
        });

        let initiator = self.context.with_label("initiator").spawn({
            let mailbox = self.mailbox.clone();
            let me = self.me;
            let gossip = self.gossip;
            let sync_period = self.sync_period;
            let max_frame = self.max_frame;
            move |context| {
                initiate(
                    context,
                    addresses,
                    me,
                    gossip,
                    sync_period,
                    max_frame,
                    mailbox,
                )
            }
        });

        let ingress = self.context.with_label("ingress").spawn({
            let mailbox = self.mailbox.clone();
            let max_frame = self.max_frame;
            let ingress_listener = self.ingress_listener;
            move |context| accept_transactions(context, ingress_listener, max_frame, mailbox)
        });

        // The driver decides when we are done; everything else is torn down
        // with it.
        let summary = driver.await.expect("driver failed");
        listener.abort();
        initiator.abort();
        ingress.abort();
        summary
    }
}

/// Accept inbound syncs, enforcing the address book and the inbound bound.
async fn listen<E: Clock + Spawner + Metrics + Clone>(
    context: E,
    listener: TcpListener,
    peers: Vec<IpAddr>,
    me: u32,
    bound: usize,
    max_frame: usize,
    mailbox: Mailbox,
) {
    let active = Arc::new(AtomicUsize::new(0));
    loop {
        let (mut stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(?err, "accept failed");
                continue;
            }
        };
        if !peers.contains(&peer_addr.ip()) {
            info!(%peer_addr, "closing connection; peer is not in the address book");
            continue;
        }
        if active.load(Ordering::Relaxed) >= bound {
            info!(%peer_addr, "too many inbound syncs; rejecting");
            continue;
        }

        active.fetch_add(1, Ordering::Relaxed);
        let mut mailbox = mailbox.clone();
        let active = active.clone();
        context.with_label("session").spawn(move |_| async move {
            match sync::run_listener(&mut stream, me, max_frame, &mut mailbox).await {
                Ok(outcome) => {
                    debug!(%peer_addr, sent = outcome.sent, received = outcome.received, "inbound sync completed")
                }
                Err(err) => debug!(%peer_addr, ?err, "inbound sync aborted"),
            }
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

/// Periodically open a sync with a peer picked by the configured strategy.
async fn initiate<E: Clock + Rng + Spawner + Metrics + Clone>(
    mut context: E,
    addresses: Vec<SocketAddr>,
    me: u32,
    gossip: GossipStrategy,
    sync_period: Duration,
    max_frame: usize,
    mailbox: Mailbox,
) {
    let n = addresses.len();
    let mut counter: u64 = 0;
    let mut last_sync: Vec<Option<u64>> = vec![None; n];
    loop {
        context.sleep(sync_period).await;

        let mut candidates: Vec<usize> = match gossip {
            GossipStrategy::UniformRandom => (0..n).filter(|&peer| peer != me as usize).collect(),
            GossipStrategy::NonRecentRandom => (0..n)
                .filter(|&peer| peer != me as usize)
                .filter(|&peer| match last_sync[peer] {
                    Some(at) => counter.saturating_sub(at) >= (n as u64) / 3,
                    None => true,
                })
                .collect(),
        };
        if candidates.is_empty() {
            // Everyone is recent; fall back to the full peer set.
            candidates = (0..n).filter(|&peer| peer != me as usize).collect();
        }
        if candidates.is_empty() {
            continue;
        }
        let target = candidates[context.gen_range(0..candidates.len())];
        counter += 1;
        last_sync[target] = Some(counter);

        let mut mailbox = mailbox.clone();
        let address = addresses[target];
        let target = target as u32;
        context
            .with_label("session")
            .spawn(move |_| async move {
                let mut stream = match TcpStream::connect(address).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        debug!(%address, ?err, "could not reach peer");
                        return;
                    }
                };
                match sync::run_initiator(&mut stream, target, max_frame, &mut mailbox).await {
                    Ok(outcome) => {
                        debug!(peer = target, sent = outcome.sent, received = outcome.received, "sync completed")
                    }
                    Err(err) => debug!(peer = target, ?err, "sync aborted"),
                }
            });
    }
}

/// Accept ingress connections and stream verified transfer batches into the
/// driver.
async fn accept_transactions<E: Clock + Spawner + Metrics + Clone>(
    context: E,
    listener: TcpListener,
    max_frame: usize,
    mailbox: Mailbox,
) {
    loop {
        let (mut stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(?err, "ingress accept failed");
                continue;
            }
        };
        let mut mailbox = mailbox.clone();
        context.with_label("submitter").spawn(move |_| async move {
            loop {
                let payload = match sync::read_frame(&mut stream, max_frame).await {
                    Ok(payload) => payload,
                    Err(err) => {
                        debug!(%peer_addr, ?err, "ingress connection closed");
                        return;
                    }
                };
                let batch = match TransactionBatch::decode(payload.as_slice()) {
                    Ok(batch) => batch,
                    Err(err) => {
                        debug!(%peer_addr, ?err, "dropping malformed transaction batch");
                        return;
                    }
                };
                let (valid, invalid): (Vec<_>, Vec<_>) = batch
                    .transactions
                    .into_iter()
                    .partition(|transaction| transaction.verify());
                if !invalid.is_empty() {
                    warn!(%peer_addr, dropped = invalid.len(), "dropping unsigned transfers");
                }
                if mailbox.submit(valid).await.is_err() {
                    return;
                }
            }
        });
    }
}
