//! Unit creation.
//!
//! A new unit always extends the creator's own chain (self-predecessor first)
//! and merges in maximal units of other creators, skipping known forkers and
//! only taking parents that make more prime units reachable at the
//! self-predecessor's level. If no such parent set exists yet, nothing is
//! created and the caller retries on its next tick.

use crate::{
    coin,
    poset::{Poset, UnitId},
};
use commonware_cryptography::{bls12381::primitives::group, ed25519::PrivateKey};
use lattice_types::{Transaction, Unit};
use rand::{seq::SliceRandom, Rng};

/// Pick the parents of the next unit for `me`: the empty set to start the
/// chain, or the self-predecessor plus expanding candidates. `None` when no
/// admissible parent set exists yet.
pub fn select_parents<R: Rng>(
    rng: &mut R,
    poset: &Poset,
    me: u32,
    n_parents: usize,
) -> Option<Vec<UnitId>> {
    // Without a unit of our own yet, start the chain.
    let Some(&self_predecessor) = poset.maximal(me).first() else {
        return Some(Vec::new());
    };

    // Candidates: maximal units of every other non-forker creator.
    let mut candidates: Vec<UnitId> = Vec::new();
    for creator in 0..poset.size() {
        if creator == me || poset.is_forker(creator) {
            continue;
        }
        candidates.extend_from_slice(poset.maximal(creator));
    }
    candidates.shuffle(rng);

    // Greedily take candidates that expand the primes reachable at the
    // self-predecessor's level, as admission will demand.
    let level = poset.record(self_predecessor).level;
    let mut visible = poset.prime_creators_below(self_predecessor, level);
    let mut parents = vec![self_predecessor];
    for candidate in candidates {
        if parents.len() >= n_parents {
            break;
        }
        let reachable = poset.prime_creators_below(candidate, level);
        if reachable.is_subset(&visible) {
            continue;
        }
        visible.extend(reachable);
        parents.push(candidate);
    }
    if parents.len() < 2 {
        return None;
    }
    Some(parents)
}

/// Sign a unit with the given parents, attaching a coin share when the unit
/// will be a prime at or above the coin level.
pub fn build_unit(
    poset: &Poset,
    me: u32,
    signer: &PrivateKey,
    share: &group::Share,
    parents: Vec<UnitId>,
    transactions: Vec<Transaction>,
) -> Unit {
    let staged = poset.stage(&parents);
    let coin_share = (staged.prime && staged.level >= poset.coin_level())
        .then(|| coin::sign_share(share, staged.level));

    let parents = parents
        .into_iter()
        .map(|id| poset.record(id).digest)
        .collect();
    Unit::sign(signer, me, parents, transactions, coin_share)
}

/// Try to build and sign the next unit for `me`.
pub fn create_unit<R: Rng>(
    rng: &mut R,
    poset: &Poset,
    me: u32,
    signer: &PrivateKey,
    share: &group::Share,
    n_parents: usize,
    transactions: Vec<Transaction>,
) -> Option<Unit> {
    let parents = select_parents(rng, poset, me, n_parents)?;
    Some(build_unit(poset, me, signer, share, parents, transactions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poset::Admission;
    use crate::testing;
    use commonware_cryptography::Digestible;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_created_units_are_compliant() {
        let mut rng = StdRng::seed_from_u64(7);
        let fixture = testing::fixture(4);
        let mut poset = testing::poset(&fixture);

        // Drive every creator for a few rounds; whatever comes out must admit.
        for _ in 0..6 {
            for me in 0..4u32 {
                let Some(unit) = create_unit(
                    &mut rng,
                    &poset,
                    me,
                    &fixture.privates[me as usize],
                    &fixture.shares[me as usize],
                    2,
                    Vec::new(),
                ) else {
                    continue;
                };
                poset.admit(unit).expect("created unit must be compliant");
            }
        }
        assert!(poset.len() >= 8);
        assert!(poset.max_level().expect("units admitted") >= 1);
    }

    #[test]
    fn test_forkers_are_not_extended() {
        let mut rng = StdRng::seed_from_u64(11);
        let fixture = testing::fixture(4);
        let mut poset = testing::poset(&fixture);
        testing::grow(&mut rng, &fixture, &mut poset, 3);

        // Creator 0 forks: two different units at the same height.
        let fork_height = {
            let &tip = poset.maximal(0).first().expect("creator 0 has units");
            poset.record(tip).height
        };
        let forks = testing::fork(&mut rng, &fixture, &poset, 0);
        let mut newly_forked = false;
        for unit in forks {
            if let Admission::Added { newly_forked: f, .. } =
                poset.admit(unit).expect("fork branches are admissible")
            {
                newly_forked |= f;
            }
        }
        assert!(newly_forked);
        assert!(poset.is_forker(0));
        assert!(poset.units_at_height(0, fork_height + 1).len() >= 2);

        // Honest creators never pick the forker's units as parents again.
        for _ in 0..4 {
            for me in 1..4u32 {
                let Some(unit) = create_unit(
                    &mut rng,
                    &poset,
                    me,
                    &fixture.privates[me as usize],
                    &fixture.shares[me as usize],
                    3,
                    Vec::new(),
                ) else {
                    continue;
                };
                for parent in &unit.parents {
                    let parent = poset.get(parent).expect("parent admitted");
                    assert_ne!(parent.unit.creator, 0);
                }
                poset.admit(unit).expect("compliant");
            }
        }
    }

    #[test]
    fn test_first_unit_is_genesis() {
        let mut rng = StdRng::seed_from_u64(3);
        let fixture = testing::fixture(4);
        let poset = testing::poset(&fixture);
        let unit = create_unit(
            &mut rng,
            &poset,
            2,
            &fixture.privates[2],
            &fixture.shares[2],
            2,
            Vec::new(),
        )
        .expect("genesis is always creatable");
        assert!(unit.is_genesis());
        assert_eq!(unit.creator, 2);
        let _ = unit.digest();
    }
}
