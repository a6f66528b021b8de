//! Pending transfers awaiting inclusion in a unit.
//!
//! A bounded FIFO fed by the ingress listener and drained by the creator
//! loop. Signature verification happens at the ingress edge, so everything in
//! here is ready to be carried.

use commonware_runtime::Metrics;
use lattice_types::Transaction;
use prometheus_client::metrics::gauge::Gauge;
use std::collections::VecDeque;
use tracing::warn;

pub struct Mempool {
    capacity: usize,
    queue: VecDeque<Transaction>,

    depth: Gauge,
}

impl Mempool {
    pub fn new(context: impl Metrics, capacity: usize) -> Self {
        let depth = Gauge::default();
        context.register(
            "transactions",
            "Number of transfers waiting for inclusion",
            depth.clone(),
        );

        Self {
            capacity,
            queue: VecDeque::new(),
            depth,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueue a transfer, dropping it if the pool is full.
    pub fn add(&mut self, transaction: Transaction) {
        if self.queue.len() >= self.capacity {
            warn!("mempool full; dropping transfer");
            return;
        }
        self.queue.push_back(transaction);
        self.depth.set(self.queue.len() as i64);
    }

    /// Take up to `max` transfers, oldest first.
    pub fn drain(&mut self, max: usize) -> Vec<Transaction> {
        let take = max.min(self.queue.len());
        let drained = self.queue.drain(..take).collect();
        self.depth.set(self.queue.len() as i64);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use commonware_runtime::{deterministic, Runner};

    #[test]
    fn test_add_and_drain_preserves_order() {
        let runner = deterministic::Runner::default();
        runner.start(|context| async move {
            let mut mempool = Mempool::new(context, 8);
            for index in 0..5 {
                mempool.add(testing::transfer(50, index, 1));
            }
            assert_eq!(mempool.len(), 5);

            let drained = mempool.drain(3);
            assert_eq!(drained.len(), 3);
            assert_eq!(
                drained.iter().map(|tx| tx.index).collect::<Vec<_>>(),
                vec![0, 1, 2]
            );
            assert_eq!(mempool.len(), 2);

            let rest = mempool.drain(10);
            assert_eq!(rest.len(), 2);
            assert!(mempool.is_empty());
        });
    }

    #[test]
    fn test_overflow_is_dropped() {
        let runner = deterministic::Runner::default();
        runner.start(|context| async move {
            let mut mempool = Mempool::new(context, 2);
            for index in 0..4 {
                mempool.add(testing::transfer(60, index, 1));
            }
            assert_eq!(mempool.len(), 2);
            let drained = mempool.drain(4);
            assert_eq!(
                drained.iter().map(|tx| tx.index).collect::<Vec<_>>(),
                vec![0, 1]
            );
        });
    }
}
