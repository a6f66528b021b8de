//! The process driver.
//!
//! A single task that owns the poset, the orderer, the ledger, and the
//! mempool. The creator loop runs on a fixed cadence inside the same task;
//! sync sessions and the transaction ingress reach it only through the
//! mailbox, so no state is ever shared.

use super::ingress::{Mailbox, Message};
use crate::{
    creator,
    mempool::Mempool,
    orderer::{Orderer, ValidationMode},
    poset::{Admission, Poset},
    Committee,
};
use commonware_cryptography::{
    bls12381::primitives::group, ed25519::{PrivateKey, PublicKey}, sha256::Digest,
};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::{channel::mpsc, StreamExt};
use lattice_execution::Ledger;
use lattice_types::{Status, Tip};
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use rand::{CryptoRng, Rng};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the [Actor].
pub struct Config {
    pub me: u32,
    pub signer: PrivateKey,
    pub share: group::Share,
    pub committee: Committee,

    pub mode: ValidationMode,
    pub endowments: Vec<(PublicKey, u64)>,

    pub n_parents: usize,
    pub coin_level: u64,
    pub create_period: Duration,
    pub max_unit_transactions: usize,
    pub mempool_capacity: usize,
    pub mailbox_size: usize,

    /// Stop creating after this many own units.
    pub unit_limit: Option<u64>,
    /// Shut down once any unit at this level is admitted.
    pub level_limit: Option<u64>,
    /// How long to keep serving syncs after the level limit is hit, so
    /// slower peers can still catch up.
    pub shutdown_grace: Duration,
}

/// Final state reported when the driver exits.
#[derive(Clone, Debug)]
pub struct Summary {
    pub units: usize,
    pub created: u64,
    pub max_level: Option<u64>,
    pub decided_levels: u64,
    pub tips: Vec<Tip>,
    pub forkers: Vec<bool>,
    pub order: Vec<Digest>,
    pub ledger: Ledger,
}

pub struct Actor<E: Clock + Rng + CryptoRng + Spawner + Metrics + Clone> {
    context: E,

    me: u32,
    signer: PrivateKey,
    share: group::Share,
    n_parents: usize,
    create_period: Duration,
    max_unit_transactions: usize,
    unit_limit: Option<u64>,
    level_limit: Option<u64>,
    shutdown_grace: Duration,
    draining_until: Option<std::time::SystemTime>,

    poset: Poset,
    orderer: Orderer,
    ledger: Ledger,
    mempool: Mempool,
    created: u64,

    receiver: mpsc::Receiver<Message>,

    admitted_units: Gauge,
    ordered_units: Gauge,
    forker_count: Gauge,
    created_units: Counter,
}

impl<E: Clock + Rng + CryptoRng + Spawner + Metrics + Clone> Actor<E> {
    pub fn new(context: E, cfg: Config) -> (Self, Mailbox) {
        let admitted_units = Gauge::default();
        let ordered_units = Gauge::default();
        let forker_count = Gauge::default();
        let created_units = Counter::default();
        context.register(
            "admitted_units",
            "Number of units admitted to the poset",
            admitted_units.clone(),
        );
        context.register(
            "ordered_units",
            "Number of units in the linear order",
            ordered_units.clone(),
        );
        context.register(
            "forkers",
            "Number of creators marked as forkers",
            forker_count.clone(),
        );
        context.register(
            "created_units",
            "Number of units created by this process",
            created_units.clone(),
        );

        let (sender, receiver) = mpsc::channel(cfg.mailbox_size);
        let mempool = Mempool::new(context.with_label("mempool"), cfg.mempool_capacity);
        let actor = Self {
            me: cfg.me,
            signer: cfg.signer,
            share: cfg.share,
            n_parents: cfg.n_parents,
            create_period: cfg.create_period,
            max_unit_transactions: cfg.max_unit_transactions,
            unit_limit: cfg.unit_limit,
            level_limit: cfg.level_limit,
            shutdown_grace: cfg.shutdown_grace,
            draining_until: None,
            poset: Poset::new(cfg.committee, cfg.coin_level),
            orderer: Orderer::new(cfg.mode),
            ledger: Ledger::with_endowments(cfg.endowments),
            mempool,
            created: 0,
            receiver,
            context,
            admitted_units,
            ordered_units,
            forker_count,
            created_units,
        };
        (actor, Mailbox::new(sender))
    }

    pub fn start(self) -> Handle<Summary> {
        self.context.clone().spawn(|_| self.run())
    }

    async fn run(mut self) -> Summary {
        let mut next_create = self.context.current() + self.create_period;
        loop {
            if self.draining_until.is_none() && self.limit_reached() {
                // Stop creating but keep answering syncs for a grace period
                // so slower peers can still catch up.
                info!("level limit reached; draining");
                self.draining_until = Some(self.context.current() + self.shutdown_grace);
            }
            if let Some(deadline) = self.draining_until {
                if self.context.current() >= deadline {
                    break;
                }
            }
            let wait = next_create
                .duration_since(self.context.current())
                .unwrap_or(Duration::ZERO);
            select! {
                _ = self.context.sleep(wait) => {
                    next_create = self.context.current() + self.create_period;
                    if self.draining_until.is_none() {
                        self.try_create();
                    }
                },
                message = self.receiver.next() => {
                    let Some(message) = message else {
                        break;
                    };
                    self.handle(message);
                },
            }
        }

        let summary = self.summary();
        info!(
            units = summary.units,
            created = summary.created,
            max_level = ?summary.max_level,
            decided = summary.decided_levels,
            ordered = summary.order.len(),
            "driver stopped"
        );
        summary
    }

    fn limit_reached(&self) -> bool {
        match (self.level_limit, self.poset.max_level()) {
            (Some(limit), Some(level)) => level >= limit,
            _ => false,
        }
    }

    fn try_create(&mut self) {
        if let Some(limit) = self.unit_limit {
            if self.created >= limit {
                return;
            }
        }
        let Some(parents) =
            creator::select_parents(&mut self.context, &self.poset, self.me, self.n_parents)
        else {
            return;
        };
        let transactions = self.mempool.drain(self.max_unit_transactions);
        let unit = creator::build_unit(
            &self.poset,
            self.me,
            &self.signer,
            &self.share,
            parents,
            transactions,
        );
        match self.poset.admit(unit) {
            Ok(Admission::Added { id, .. }) => {
                self.created += 1;
                self.created_units.inc();
                let record = self.poset.record(id);
                debug!(
                    height = record.height,
                    level = record.level,
                    prime = record.prime,
                    "created unit"
                );
                self.orderer.admitted(&self.poset, &mut self.ledger, id);
                self.update_metrics();
            }
            Ok(Admission::Existing(_)) => {}
            Err(err) => {
                // A unit we built ourselves must always pass our own checks.
                unreachable!("own unit failed compliance: {err}");
            }
        }
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Status { response } => {
                let _ = response.send(Status {
                    process: self.me,
                    tips: self.poset.tips(),
                });
            }
            Message::UnitsSince { tips, response } => {
                let _ = response.send(self.poset.units_since(&tips));
            }
            Message::Deliver { units, response } => {
                let mut admitted = 0usize;
                let mut outcome = Ok(());
                for unit in units {
                    match self.poset.admit(unit) {
                        Ok(Admission::Added { id, newly_forked }) => {
                            admitted += 1;
                            if newly_forked {
                                let creator = self.poset.record(id).unit.creator;
                                warn!(creator, "creator exposed as forker");
                            }
                            self.orderer.admitted(&self.poset, &mut self.ledger, id);
                        }
                        Ok(Admission::Existing(_)) => {}
                        Err(err) => {
                            warn!(?err, "dropping remainder of unit batch");
                            outcome = Err(err);
                            break;
                        }
                    }
                }
                self.update_metrics();
                let _ = response.send(outcome.map(|()| admitted));
            }
            Message::Submit { transactions } => {
                for transaction in transactions {
                    self.mempool.add(transaction);
                }
            }
        }
    }

    fn update_metrics(&self) {
        self.admitted_units.set(self.poset.len() as i64);
        self.ordered_units.set(self.orderer.order().len() as i64);
        self.forker_count.set(
            self.poset
                .forkers()
                .iter()
                .filter(|&&forked| forked)
                .count() as i64,
        );
    }

    fn summary(&self) -> Summary {
        Summary {
            units: self.poset.len(),
            created: self.created,
            max_level: self.poset.max_level(),
            decided_levels: self.orderer.decided_levels(),
            tips: self.poset.tips(),
            forkers: self.poset.forkers().to_vec(),
            order: self.orderer.order().to_vec(),
            ledger: self.ledger.clone(),
        }
    }
}
