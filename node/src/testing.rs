//! Shared fixtures for node tests: a seeded committee with threshold shares
//! and helpers to grow deterministic posets.

use crate::{creator, poset::Poset, Committee};
use commonware_cryptography::{
    bls12381::{dkg::ops::generate_shares, primitives::{group, variant::MinSig}},
    ed25519::PrivateKey,
    PrivateKeyExt, Signer,
};
use commonware_utils::quorum;
use lattice_types::{Transaction, Unit};
use rand::Rng;
use rand::{rngs::StdRng, SeedableRng};

pub(crate) const COIN_LEVEL: u64 = 4;

pub(crate) struct Fixture {
    pub committee: Committee,
    pub privates: Vec<PrivateKey>,
    pub shares: Vec<group::Share>,
}

pub(crate) fn fixture(n: u32) -> Fixture {
    let mut rng = StdRng::seed_from_u64(42);
    let (polynomial, shares) = generate_shares::<_, MinSig>(&mut rng, None, n, quorum(n));
    let privates: Vec<PrivateKey> = (0..n as u64).map(PrivateKey::from_seed).collect();
    let publics = privates.iter().map(|private| private.public_key()).collect();
    Fixture {
        committee: Committee::new(publics, polynomial),
        privates,
        shares,
    }
}

pub(crate) fn poset(fixture: &Fixture) -> Poset {
    Poset::new(fixture.committee.clone(), COIN_LEVEL)
}

/// Run every creator for `rounds` rounds against `poset`, admitting whatever
/// comes out. Returns the produced units in admission order so mirrors can be
/// fed the same sequence.
pub(crate) fn grow<R: Rng>(
    rng: &mut R,
    fixture: &Fixture,
    poset: &mut Poset,
    rounds: usize,
) -> Vec<Unit> {
    grow_with(rng, fixture, poset, rounds, |_, _| Vec::new())
}

/// Like [grow], but lets the caller attach transactions per (round, creator).
pub(crate) fn grow_with<R: Rng>(
    rng: &mut R,
    fixture: &Fixture,
    poset: &mut Poset,
    rounds: usize,
    mut transactions: impl FnMut(usize, u32) -> Vec<Transaction>,
) -> Vec<Unit> {
    let n = fixture.committee.size();
    let mut produced = Vec::new();
    for round in 0..rounds {
        for me in 0..n {
            let Some(unit) = creator::create_unit(
                rng,
                poset,
                me,
                &fixture.privates[me as usize],
                &fixture.shares[me as usize],
                n as usize,
                transactions(round, me),
            ) else {
                continue;
            };
            poset.admit(unit.clone()).expect("created unit must admit");
            produced.push(unit);
        }
    }
    produced
}

/// Two units by `me` occupying the same height: a fork. Neither is admitted.
pub(crate) fn fork<R: Rng>(
    rng: &mut R,
    fixture: &Fixture,
    poset: &Poset,
    me: u32,
) -> Vec<Unit> {
    let a = creator::create_unit(
        rng,
        poset,
        me,
        &fixture.privates[me as usize],
        &fixture.shares[me as usize],
        fixture.committee.size() as usize,
        Vec::new(),
    )
    .expect("fork base unit");
    // Same chain position, different payload.
    let b = Unit::sign(
        &fixture.privates[me as usize],
        me,
        a.parents.clone(),
        vec![transfer(999, 0, 1)],
        a.coin_share.clone(),
    );
    vec![a, b]
}

pub(crate) fn transfer(seed: u64, index: u64, amount: u64) -> Transaction {
    let issuer = PrivateKey::from_seed(seed);
    let receiver = PrivateKey::from_seed(seed + 1).public_key();
    Transaction::sign(&issuer, index, receiver, amount)
}
