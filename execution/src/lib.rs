//! The replicated account ledger.
//!
//! Balances and per-issuer transfer indices, mutated only by the ordering
//! engine (or the fast-validation path) of the node. A transfer is applied iff
//! the issuer can cover it and its index is exactly one past the issuer's last
//! applied transfer; anything else is skipped without error, since a competing
//! transfer may simply have been ordered first.

use commonware_cryptography::ed25519::PublicKey;
use lattice_types::Transaction;
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: u64,
    /// Index the issuer's next transfer must carry (0 for a fresh account).
    pub next_index: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    accounts: HashMap<PublicKey, Account>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the ledger with initial endowments.
    pub fn with_endowments(endowments: impl IntoIterator<Item = (PublicKey, u64)>) -> Self {
        let mut accounts = HashMap::new();
        for (public, balance) in endowments {
            accounts.insert(
                public,
                Account {
                    balance,
                    next_index: 0,
                },
            );
        }
        Self { accounts }
    }

    pub fn balance(&self, public: &PublicKey) -> u64 {
        self.accounts
            .get(public)
            .map(|account| account.balance)
            .unwrap_or(0)
    }

    pub fn next_index(&self, public: &PublicKey) -> u64 {
        self.accounts
            .get(public)
            .map(|account| account.next_index)
            .unwrap_or(0)
    }

    /// Whether a transfer would apply against the current state.
    pub fn check(&self, transaction: &Transaction) -> bool {
        let issuer = match self.accounts.get(&transaction.issuer) {
            Some(account) => account,
            None => return transaction.amount == 0 && transaction.index == 0,
        };
        issuer.balance >= transaction.amount && transaction.index == issuer.next_index
    }

    /// Apply a transfer if it is valid. Returns whether it was applied;
    /// invalid transfers are skipped silently.
    pub fn apply(&mut self, transaction: &Transaction) -> bool {
        if !self.check(transaction) {
            debug!(
                index = transaction.index,
                amount = transaction.amount,
                "skipping invalid transfer"
            );
            return false;
        }

        // Credit the receiver first so a self-transfer nets out.
        let receiver = self
            .accounts
            .entry(transaction.receiver.clone())
            .or_default();
        let Some(credited) = receiver.balance.checked_add(transaction.amount) else {
            debug!("skipping transfer that would overflow the receiver");
            return false;
        };
        receiver.balance = credited;

        let issuer = self
            .accounts
            .entry(transaction.issuer.clone())
            .or_default();
        issuer.balance -= transaction.amount;
        issuer.next_index += 1;
        true
    }
}
