//! Admission checks.
//!
//! A unit enters the poset only if every check here passes against the current
//! state. Forking is detected but not rejected: a second unit at an already
//! occupied (creator, height) slot is admitted and flips the creator's forker
//! flag, which honest creators then use to stop extending the forker's chains.

use super::{Poset, Staged, UnitId};
use crate::coin;
use commonware_cryptography::sha256::Digest;
use lattice_types::Unit;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ComplianceError {
    #[error("creator {0} is not a committee member")]
    UnknownCreator(u32),
    #[error("parent {0:?} has not been admitted")]
    MissingParent(Digest),
    #[error("a unit carries zero or at least two parents (got {0})")]
    ParentCount(usize),
    #[error("parent {0:?} is referenced twice")]
    DuplicateParent(Digest),
    #[error("two parents by creator {0}")]
    DuplicateParentCreator(u32),
    #[error("first parent is not the creator's self-predecessor")]
    WrongSelfPredecessor,
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("additional parent expands no primes")]
    PrimesNotExpanded,
    #[error("prime unit at level {0} is missing its coin share")]
    MissingCoinShare(u64),
    #[error("unit carries a coin share it must not")]
    UnexpectedCoinShare,
    #[error("coin share does not verify")]
    InvalidCoinShare,
}

/// Validate `unit` against `poset`, returning the resolved parent ids and the
/// staged derived values on success.
pub(super) fn check(poset: &Poset, unit: &Unit) -> Result<(Vec<UnitId>, Staged), ComplianceError> {
    if unit.creator >= poset.size() {
        return Err(ComplianceError::UnknownCreator(unit.creator));
    }

    // A unit is a genesis unit (no parents) or merges at least two chains.
    if unit.parents.len() == 1 {
        return Err(ComplianceError::ParentCount(1));
    }

    // All parents must be admitted, distinct, and by distinct creators.
    let mut parent_ids = Vec::with_capacity(unit.parents.len());
    let mut digests = BTreeSet::new();
    let mut creators = BTreeSet::new();
    for digest in &unit.parents {
        if !digests.insert(*digest) {
            return Err(ComplianceError::DuplicateParent(*digest));
        }
        let id = poset
            .id(digest)
            .ok_or(ComplianceError::MissingParent(*digest))?;
        let creator = poset.record(id).unit.creator;
        if !creators.insert(creator) {
            return Err(ComplianceError::DuplicateParentCreator(creator));
        }
        parent_ids.push(id);
    }

    // The first parent is the creator's own previous unit.
    if let Some(&first) = parent_ids.first() {
        if poset.record(first).unit.creator != unit.creator {
            return Err(ComplianceError::WrongSelfPredecessor);
        }
    }

    if !unit.verify(poset.committee().public(unit.creator)) {
        return Err(ComplianceError::InvalidSignature);
    }

    let staged = poset.stage(&parent_ids);
    if !parent_ids.is_empty() {
        check_expand_primes(poset, &parent_ids)?;
    }
    check_coin_share(poset, unit, &staged)?;

    Ok((parent_ids, staged))
}

/// Relative to the self-predecessor's level, every additional parent must
/// make at least one more creator's prime unit reachable.
fn check_expand_primes(poset: &Poset, parents: &[UnitId]) -> Result<(), ComplianceError> {
    let level = poset.record(parents[0]).level;
    let mut visible = poset.prime_creators_below(parents[0], level);
    for &parent in &parents[1..] {
        let reachable = poset.prime_creators_below(parent, level);
        if reachable.is_subset(&visible) {
            return Err(ComplianceError::PrimesNotExpanded);
        }
        visible.extend(reachable);
    }
    Ok(())
}

/// A prime at or above the coin level must carry a verifying share bound to
/// its creator; any other unit must carry none.
fn check_coin_share(poset: &Poset, unit: &Unit, staged: &Staged) -> Result<(), ComplianceError> {
    let due = staged.prime && staged.level >= poset.coin_level();
    match (&unit.coin_share, due) {
        (None, true) => Err(ComplianceError::MissingCoinShare(staged.level)),
        (Some(_), false) => Err(ComplianceError::UnexpectedCoinShare),
        (Some(share), true) => {
            if share.index != unit.creator {
                return Err(ComplianceError::InvalidCoinShare);
            }
            if !coin::verify_share(&poset.committee().polynomial, staged.level, share) {
                return Err(ComplianceError::InvalidCoinShare);
            }
            Ok(())
        }
        (None, false) => Ok(()),
    }
}
