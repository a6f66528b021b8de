//! The linear-order engine.
//!
//! Driven by admissions: every time a unit enters the poset, the engine tries
//! to decide timing units for pending levels (strictly in increasing order)
//! and, for each one elected, appends the not-yet-ordered units below it to
//! the global linear order. Transfers are applied to the ledger either in that
//! order (`Linear`), the moment they are unambiguously high-confirmed
//! (`Snap`), or never (`None`).

use crate::{
    coin,
    poset::{Poset, UnitId},
};
use commonware_codec::Encode;
use commonware_cryptography::{
    ed25519::PublicKey,
    sha256::{Digest, Sha256},
    Digestible, Hasher,
};
use commonware_utils::modulo;
use lattice_types::CoinShare;
use lattice_execution::Ledger;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::debug;

/// How transfers reach the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMode {
    /// Never apply transfers.
    None,
    /// Apply a transfer once its unit is seen through a quorum and no
    /// equivocating transfer is visible, without waiting for timing.
    Snap,
    /// Apply transfers in linear order as timing levels are decided.
    Linear,
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "snap" => Ok(Self::Snap),
            "linear" => Ok(Self::Linear),
            other => Err(format!("unknown validation mode: {other}")),
        }
    }
}

/// How many levels above `l` a unit must reach before level `l` can be
/// decided.
pub const DECIDE_OFFSET: u64 = 3;

enum Election {
    Pending,
    Decided(UnitId),
}

pub struct Orderer {
    mode: ValidationMode,

    /// The next timing level to decide.
    next_level: u64,
    /// Elected timing units, one per decided level.
    timing: Vec<UnitId>,
    ordered: HashSet<UnitId>,
    order: Vec<Digest>,

    // Fast-validation state: transfers not yet confirmed, and every
    // (issuer, index) slot observed so equivocations can be detected.
    pending: Vec<(UnitId, usize)>,
    slots: HashMap<(PublicKey, u64), Vec<(UnitId, usize)>>,
}

impl Orderer {
    pub fn new(mode: ValidationMode) -> Self {
        Self {
            mode,
            next_level: 0,
            timing: Vec::new(),
            ordered: HashSet::new(),
            order: Vec::new(),
            pending: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// The linear order decided so far.
    pub fn order(&self) -> &[Digest] {
        &self.order
    }

    /// Timing levels decided so far.
    pub fn decided_levels(&self) -> u64 {
        self.next_level
    }

    /// Elected timing units, one per decided level.
    pub fn timing(&self) -> &[UnitId] {
        &self.timing
    }

    pub fn is_ordered(&self, id: UnitId) -> bool {
        self.ordered.contains(&id)
    }

    /// Feed one freshly admitted unit. `id` must be the id just returned by
    /// the poset for it.
    pub fn admitted(&mut self, poset: &Poset, ledger: &mut Ledger, id: UnitId) {
        if self.mode == ValidationMode::Snap {
            self.index_transactions(poset, id);
            self.validate_snap(poset, ledger, id);
        }
        self.advance(poset, ledger);
    }

    /// Decide as many timing levels as the poset now supports.
    fn advance(&mut self, poset: &Poset, ledger: &mut Ledger) {
        while let Election::Decided(timing) = self.elect(poset, self.next_level) {
            debug!(
                level = self.next_level,
                creator = poset.record(timing).unit.creator,
                "timing unit elected"
            );
            self.timing.push(timing);
            self.extend(poset, ledger, timing);
            self.next_level += 1;
        }
    }

    /// Elect the timing unit at `level`, if some unit high enough above it
    /// already determines the outcome.
    fn elect(&self, poset: &Poset, level: u64) -> Election {
        let deciders = poset.units_at_level(level + DECIDE_OFFSET);
        if deciders.is_empty() {
            return Election::Pending;
        }

        // Candidates: primes at the level by non-forker creators, walked in
        // the common random permutation starting at the coin-picked offset.
        let ranks = coin::permutation(&poset.committee().publics, level);
        let mut candidates: Vec<UnitId> = poset
            .primes_at_level(level)
            .iter()
            .copied()
            .filter(|&prime| !poset.is_forker(poset.record(prime).unit.creator))
            .collect();
        if candidates.is_empty() {
            return Election::Pending;
        }
        candidates.sort_by_key(|&prime| {
            let creator = poset.record(prime).unit.creator;
            ranks
                .iter()
                .position(|&index| index == creator)
                .expect("creator is a committee member")
        });

        let offset = if level >= poset.coin_level() {
            match self.toss(poset, level, deciders) {
                Some(signature) => {
                    modulo(signature.encode().as_ref(), candidates.len() as u64) as usize
                }
                None => return Election::Pending,
            }
        } else {
            0
        };

        for step in 0..candidates.len() {
            let candidate = candidates[(offset + step) % candidates.len()];
            if deciders
                .iter()
                .any(|&decider| poset.seen_through_quorum(candidate, decider))
            {
                return Election::Decided(candidate);
            }
        }
        Election::Pending
    }

    /// Recover the combined coin signature for `level` from the shares some
    /// decider can reach. Uniqueness of the combined signature makes the
    /// choice of decider (and share subset) irrelevant.
    fn toss(
        &self,
        poset: &Poset,
        level: u64,
        deciders: &[UnitId],
    ) -> Option<lattice_types::ThresholdSignature> {
        let identity = poset.committee().identity();
        for &decider in deciders {
            let mut shares: Vec<CoinShare> = Vec::new();
            for &prime in poset.primes_at_level(level) {
                if !poset.below(prime, decider) {
                    continue;
                }
                let Some(share) = poset.record(prime).unit.coin_share.clone() else {
                    continue;
                };
                if shares.iter().any(|existing| existing.index == share.index) {
                    continue;
                }
                shares.push(share);
            }
            if let Some(signature) =
                coin::combine(&identity, poset.threshold(), level, &shares)
            {
                return Some(signature);
            }
        }
        None
    }

    /// Append every not-yet-ordered unit below the elected timing unit,
    /// lowest level first and within a level in a per-timing-unit
    /// pseudo-random order, then (in linear mode) apply their transfers.
    fn extend(&mut self, poset: &Poset, ledger: &mut Ledger, timing: UnitId) {
        let mut batch = Vec::new();
        let mut stack = vec![timing];
        let mut visited = HashSet::new();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) || self.ordered.contains(&id) {
                continue;
            }
            batch.push(id);
            stack.extend(poset.record(id).parents.iter().copied());
        }

        let anchor = poset.record(timing).digest;
        batch.sort_by_cached_key(|&id| {
            let record = poset.record(id);
            let mut hasher = Sha256::new();
            hasher.update(record.digest.as_ref());
            hasher.update(anchor.as_ref());
            (record.level, hasher.finalize().as_ref().to_vec())
        });

        for id in batch {
            self.ordered.insert(id);
            let record = poset.record(id);
            self.order.push(record.digest);
            if self.mode == ValidationMode::Linear {
                for transaction in record.unit.transactions() {
                    ledger.apply(transaction);
                }
            }
        }
    }

    fn index_transactions(&mut self, poset: &Poset, id: UnitId) {
        for (position, transaction) in poset.record(id).unit.transactions().enumerate() {
            self.slots
                .entry((transaction.issuer.clone(), transaction.index))
                .or_default()
                .push((id, position));
            self.pending.push((id, position));
        }
    }

    /// Fast validation: confirm every pending transfer the new unit is high
    /// enough above, unless an equivocating transfer is also visible below it.
    fn validate_snap(&mut self, poset: &Poset, ledger: &mut Ledger, validator: UnitId) {
        let mut still_pending = Vec::new();
        for (carrier, position) in std::mem::take(&mut self.pending) {
            if !poset.seen_through_quorum(carrier, validator) {
                still_pending.push((carrier, position));
                continue;
            }
            let transaction = &poset.record(carrier).unit.transactions[position];
            let digest = transaction.digest();
            let slot = &self.slots[&(transaction.issuer.clone(), transaction.index)];
            let equivocated = slot.iter().any(|&(other, other_position)| {
                if (other, other_position) == (carrier, position) {
                    return false;
                }
                let competing = &poset.record(other).unit.transactions[other_position];
                competing.digest() != digest && poset.below(other, validator)
            });
            if equivocated {
                debug!(
                    index = transaction.index,
                    "dropping equivocated transfer"
                );
                continue;
            }
            ledger.apply(transaction);
        }
        self.pending = still_pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poset::Admission;
    use crate::testing;
    use commonware_cryptography::{ed25519::PrivateKey, PrivateKeyExt, Signer};
    use lattice_types::{Transaction, Unit};
    use rand::{rngs::StdRng, SeedableRng};

    /// Replay a unit sequence into a fresh poset, driving an orderer with the
    /// given mode and ledger.
    fn replay(
        fixture: &testing::Fixture,
        units: &[Unit],
        mode: ValidationMode,
        ledger: &mut Ledger,
    ) -> (crate::poset::Poset, Orderer) {
        let mut poset = testing::poset(fixture);
        let mut orderer = Orderer::new(mode);
        for unit in units {
            let admission = poset.admit(unit.clone()).expect("unit admits");
            let Admission::Added { id, .. } = admission else {
                continue;
            };
            orderer.admitted(&poset, ledger, id);
        }
        (poset, orderer)
    }

    fn endowed(seeds: impl IntoIterator<Item = u64>, balance: u64) -> Ledger {
        Ledger::with_endowments(
            seeds
                .into_iter()
                .map(|seed| (PrivateKey::from_seed(seed).public_key(), balance)),
        )
    }

    #[test]
    fn test_replicas_agree_on_order_and_ledger() {
        let mut rng = StdRng::seed_from_u64(21);
        let fixture = testing::fixture(4);
        let mut source = testing::poset(&fixture);

        // One independent transfer per round, carried by rotating creators.
        let units = testing::grow_with(&mut rng, &fixture, &mut source, 10, |round, me| {
            if me as usize == round % 4 {
                vec![testing::transfer(600 + round as u64, 0, 5)]
            } else {
                Vec::new()
            }
        });

        let mut first_ledger = endowed((600..610).collect::<Vec<_>>(), 10);
        let mut second_ledger = first_ledger.clone();
        let (first_poset, first) = replay(&fixture, &units, ValidationMode::Linear, &mut first_ledger);
        let (second_poset, second) =
            replay(&fixture, &units, ValidationMode::Linear, &mut second_ledger);

        // Enough levels to cross the coin level and exercise the toss.
        assert!(
            first.decided_levels() > testing::COIN_LEVEL,
            "decided {} levels",
            first.decided_levels()
        );
        assert_eq!(first.decided_levels(), second.decided_levels());
        assert_eq!(first.order(), second.order());
        assert_eq!(first_ledger, second_ledger);

        // The elected timing units are identical, level for level.
        let first_timing: Vec<_> = first
            .timing()
            .iter()
            .map(|&id| first_poset.record(id).digest)
            .collect();
        let second_timing: Vec<_> = second
            .timing()
            .iter()
            .map(|&id| second_poset.record(id).digest)
            .collect();
        assert_eq!(first_timing, second_timing);
    }

    #[test]
    fn test_each_unit_ordered_exactly_once() {
        let mut rng = StdRng::seed_from_u64(23);
        let fixture = testing::fixture(4);
        let mut source = testing::poset(&fixture);
        let units = testing::grow(&mut rng, &fixture, &mut source, 10);

        let mut ledger = Ledger::new();
        let (poset, orderer) = replay(&fixture, &units, ValidationMode::None, &mut ledger);

        let unique: HashSet<_> = orderer.order().iter().copied().collect();
        assert_eq!(unique.len(), orderer.order().len());

        // Everything comfortably below the decided frontier has been ordered.
        let decided = orderer.decided_levels();
        assert!(decided >= 2);
        for id in 0..poset.len() {
            if poset.record(id).level + 2 <= decided {
                assert!(orderer.is_ordered(id), "unit {id} left unordered");
            }
        }

        // Ordering never touches the ledger in this mode.
        assert_eq!(ledger, Ledger::new());
    }

    #[test]
    fn test_order_is_append_only_and_level_monotone_per_batch() {
        let mut rng = StdRng::seed_from_u64(29);
        let fixture = testing::fixture(4);
        let mut source = testing::poset(&fixture);
        let units = testing::grow(&mut rng, &fixture, &mut source, 8);

        // Replaying a strict prefix yields a prefix of the full order.
        let mut ledger = Ledger::new();
        let (_, full) = replay(&fixture, &units, ValidationMode::None, &mut ledger);
        let (_, partial) = replay(
            &fixture,
            &units[..units.len() - 4],
            ValidationMode::None,
            &mut ledger,
        );
        assert!(partial.order().len() <= full.order().len());
        assert_eq!(
            &full.order()[..partial.order().len()],
            partial.order()
        );
    }

    #[test]
    fn test_snap_applies_exactly_one_of_two_conflicting_transfers() {
        let mut rng = StdRng::seed_from_u64(31);
        let fixture = testing::fixture(4);
        let mut source = testing::poset(&fixture);

        let issuer = PrivateKey::from_seed(700);
        let to_b = Transaction::sign(&issuer, 0, PrivateKey::from_seed(701).public_key(), 60);
        let to_c = Transaction::sign(&issuer, 0, PrivateKey::from_seed(702).public_key(), 60);
        let conflicting = [to_b.clone(), to_c.clone()];

        // Creator 0 publishes the first transfer early; creator 1 publishes
        // the conflicting one two rounds later, after the first is already
        // confirmed.
        let units = testing::grow_with(&mut rng, &fixture, &mut source, 8, |round, me| {
            match (round, me) {
                (2, 0) => vec![conflicting[0].clone()],
                (4, 1) => vec![conflicting[1].clone()],
                _ => Vec::new(),
            }
        });

        let mut ledger = endowed([700], 100);
        let (_, orderer) = replay(&fixture, &units, ValidationMode::Snap, &mut ledger);
        assert!(orderer.decided_levels() > 0);

        let a = PrivateKey::from_seed(700).public_key();
        let b = PrivateKey::from_seed(701).public_key();
        let c = PrivateKey::from_seed(702).public_key();
        assert_eq!(ledger.balance(&a), 40);
        assert_eq!(ledger.balance(&b) + ledger.balance(&c), 60);
        assert_eq!(ledger.next_index(&a), 1);
    }

    #[test]
    fn test_snap_replicas_agree() {
        let mut rng = StdRng::seed_from_u64(37);
        let fixture = testing::fixture(4);
        let mut source = testing::poset(&fixture);
        let units = testing::grow_with(&mut rng, &fixture, &mut source, 8, |round, me| {
            if me == 3 {
                vec![testing::transfer(800 + round as u64, 0, 2)]
            } else {
                Vec::new()
            }
        });

        let mut first_ledger = endowed((800..808).collect::<Vec<_>>(), 10);
        let mut second_ledger = first_ledger.clone();
        let (_, _) = replay(&fixture, &units, ValidationMode::Snap, &mut first_ledger);
        let (_, _) = replay(&fixture, &units, ValidationMode::Snap, &mut second_ledger);
        assert_eq!(first_ledger, second_ledger);
    }
}
