//! The poset of admitted units.
//!
//! The store exclusively owns every unit record: records live in an arena and
//! refer to each other through stable integer ids, never through ownership
//! edges. All derived structure (height, level, primality, dominator floors,
//! fork flags) is computed once, against the admission sequence, and cached on
//! the record.
//!
//! Reachability queries go through `floor`: for each creator, the chain-maximal
//! units by that creator reachable from a record. `U <= V` then reduces to a
//! short walk down a self-predecessor chain from one of `floor(V)[creator(U)]`.

mod compliance;

pub use compliance::ComplianceError;

use crate::Committee;
use commonware_cryptography::{sha256::Digest, Digestible};
use lattice_types::{Tip, Unit};
use std::collections::HashMap;

/// Stable arena index of an admitted unit.
pub type UnitId = usize;

/// An admitted unit together with everything the store derived about it.
#[derive(Debug)]
pub struct Record {
    pub unit: Unit,
    pub digest: Digest,
    pub parents: Vec<UnitId>,
    pub self_predecessor: Option<UnitId>,
    /// 0-based position in the creator's self-chain.
    pub height: u64,
    pub level: u64,
    /// Whether this is the lowest-height unit by its creator at its level.
    pub prime: bool,
    /// Per creator, the chain-maximal units by that creator reachable from
    /// this one.
    floor: Vec<Vec<UnitId>>,
}

/// Result of a (successful) admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The unit was already admitted; nothing changed.
    Existing(UnitId),
    Added {
        id: UnitId,
        /// Whether this unit exposed its creator as a forker.
        newly_forked: bool,
    },
}

/// Derived values of a unit that has not been admitted yet. Used both by
/// admission and by the creator to preview the unit it is about to sign.
pub struct Staged {
    pub height: u64,
    pub level: u64,
    pub prime: bool,
    floor: Vec<Vec<UnitId>>,
}

pub struct Poset {
    committee: Committee,
    threshold: u32,
    coin_level: u64,

    records: Vec<Record>,
    by_digest: HashMap<Digest, UnitId>,
    /// `by_creator[p][h]` holds every admitted unit by `p` at height `h`
    /// (more than one only when `p` forked).
    by_creator: Vec<Vec<Vec<UnitId>>>,
    /// Per creator, the admitted units with no admitted descendant by the
    /// same creator.
    maximal: Vec<Vec<UnitId>>,
    by_level: Vec<Vec<UnitId>>,
    primes: Vec<Vec<UnitId>>,
    forkers: Vec<bool>,
}

impl Poset {
    pub fn new(committee: Committee, coin_level: u64) -> Self {
        let n = committee.size() as usize;
        let threshold = committee.threshold();
        Self {
            committee,
            threshold,
            coin_level,
            records: Vec::new(),
            by_digest: HashMap::new(),
            by_creator: vec![Vec::new(); n],
            maximal: vec![Vec::new(); n],
            by_level: Vec::new(),
            primes: Vec::new(),
            forkers: vec![false; n],
        }
    }

    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    pub fn size(&self) -> u32 {
        self.committee.size()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn coin_level(&self) -> u64 {
        self.coin_level
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.by_digest.contains_key(digest)
    }

    pub fn id(&self, digest: &Digest) -> Option<UnitId> {
        self.by_digest.get(digest).copied()
    }

    pub fn record(&self, id: UnitId) -> &Record {
        &self.records[id]
    }

    pub fn get(&self, digest: &Digest) -> Option<&Record> {
        self.id(digest).map(|id| &self.records[id])
    }

    pub fn is_forker(&self, creator: u32) -> bool {
        self.forkers[creator as usize]
    }

    pub fn forkers(&self) -> &[bool] {
        &self.forkers
    }

    /// Ids of the creator's maximal units.
    pub fn maximal(&self, creator: u32) -> &[UnitId] {
        &self.maximal[creator as usize]
    }

    /// The highest level any admitted unit has reached.
    pub fn max_level(&self) -> Option<u64> {
        self.by_level.len().checked_sub(1).map(|level| level as u64)
    }

    pub fn units_at_level(&self, level: u64) -> &[UnitId] {
        self.by_level
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn primes_at_level(&self, level: u64) -> &[UnitId] {
        self.primes
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// For every creator: the largest admitted height and the digests at it.
    pub fn tips(&self) -> Vec<Tip> {
        self.by_creator
            .iter()
            .map(|rows| match rows.last() {
                Some(top) => Tip {
                    height: Some((rows.len() - 1) as u64),
                    hashes: top.iter().map(|&id| self.records[id].digest).collect(),
                },
                None => Tip::empty(),
            })
            .collect()
    }

    /// Every admitted unit by `creator` at exactly `height`.
    pub fn units_at_height(&self, creator: u32, height: u64) -> &[UnitId] {
        self.by_creator[creator as usize]
            .get(height as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every admitted unit by `creator` with height in `[min, max]`, ascending
    /// by height and covering all branches.
    pub fn units_by_creator_between(&self, creator: u32, min: u64, max: u64) -> Vec<UnitId> {
        let rows = &self.by_creator[creator as usize];
        let mut out = Vec::new();
        for height in min..=max {
            let Some(row) = rows.get(height as usize) else {
                break;
            };
            out.extend_from_slice(row);
        }
        out
    }

    /// The units a peer with the given tips is missing, in admission order
    /// (which is topological: parents always precede children).
    pub fn units_since(&self, tips: &[Tip]) -> Vec<Unit> {
        let mut from = vec![u64::MAX; self.by_creator.len()];
        for (creator, tip) in tips.iter().enumerate().take(self.by_creator.len()) {
            from[creator] = tip.height.map(|height| height + 1).unwrap_or(0);
        }
        self.records
            .iter()
            .filter(|record| record.height >= from[record.unit.creator as usize])
            .map(|record| record.unit.clone())
            .collect()
    }

    /// Whether `a` is reachable from `x` through self-predecessor edges.
    /// Both must be by the same creator.
    fn chain_below(&self, a: UnitId, mut x: UnitId) -> bool {
        let target = self.records[a].height;
        loop {
            let record = &self.records[x];
            if record.height < target {
                return false;
            }
            if record.height == target {
                return x == a;
            }
            match record.self_predecessor {
                Some(predecessor) => x = predecessor,
                None => return false,
            }
        }
    }

    /// Whether `a <= b` (reachability through parent edges, reflexive).
    pub fn below(&self, a: UnitId, b: UnitId) -> bool {
        let creator = self.records[a].unit.creator as usize;
        self.records[b].floor[creator]
            .iter()
            .any(|&x| self.chain_below(a, x))
    }

    /// Whether `w` is below dominators of `v` from at least a quorum of
    /// distinct creators.
    pub fn seen_through_quorum(&self, w: UnitId, v: UnitId) -> bool {
        let mut count = 0u32;
        for dominators in &self.records[v].floor {
            if dominators.iter().any(|&m| self.below(w, m)) {
                count += 1;
                if count >= self.threshold {
                    return true;
                }
            }
        }
        false
    }

    /// Creators with a prime unit at `level` reachable from `id`.
    pub fn prime_creators_below(&self, id: UnitId, level: u64) -> std::collections::BTreeSet<u32> {
        let mut creators = std::collections::BTreeSet::new();
        for &prime in self.primes_at_level(level) {
            let creator = self.records[prime].unit.creator;
            if creators.contains(&creator) {
                continue;
            }
            if self.below(prime, id) {
                creators.insert(creator);
            }
        }
        creators
    }

    fn sees_prime_at(&self, floor: &[Vec<UnitId>], creator: u32, level: u64) -> bool {
        self.primes_at_level(level).iter().any(|&prime| {
            self.records[prime].unit.creator == creator
                && floor[creator as usize]
                    .iter()
                    .any(|&x| self.chain_below(prime, x))
        })
    }

    /// Merge the parents' floors, keeping only chain-maximal entries per
    /// creator.
    fn merge_floors(&self, parents: &[UnitId]) -> Vec<Vec<UnitId>> {
        let n = self.by_creator.len();
        let mut floor: Vec<Vec<UnitId>> = vec![Vec::new(); n];
        for &parent in parents {
            for (creator, candidates) in self.records[parent].floor.iter().enumerate() {
                for &candidate in candidates {
                    if floor[creator].contains(&candidate) {
                        continue;
                    }
                    if floor[creator]
                        .iter()
                        .any(|&kept| self.chain_below(candidate, kept))
                    {
                        continue;
                    }
                    floor[creator].retain(|&kept| !self.chain_below(kept, candidate));
                    floor[creator].push(candidate);
                }
            }
        }
        floor
    }

    /// Compute the derived values of a unit with the given parents, without
    /// admitting it.
    pub fn stage(&self, parents: &[UnitId]) -> Staged {
        if parents.is_empty() {
            return Staged {
                height: 0,
                level: 0,
                prime: true,
                floor: vec![Vec::new(); self.by_creator.len()],
            };
        }

        let height = self.records[parents[0]].height + 1;
        let floor = self.merge_floors(parents);

        // A unit advances past the highest parent level exactly when it sees
        // prime units at that level from a quorum of non-forker creators.
        let max_parent_level = parents
            .iter()
            .map(|&parent| self.records[parent].level)
            .max()
            .expect("parents is non-empty");
        let mut seen = 0u32;
        for creator in 0..self.by_creator.len() as u32 {
            if self.forkers[creator as usize] {
                continue;
            }
            if self.sees_prime_at(&floor, creator, max_parent_level) {
                seen += 1;
            }
        }
        let level = if seen >= self.threshold {
            max_parent_level + 1
        } else {
            max_parent_level
        };
        let prime = self.records[parents[0]].level < level;

        Staged {
            height,
            level,
            prime,
            floor,
        }
    }

    /// Run every compliance check against the current poset and, if they all
    /// pass, admit the unit. Admitting an already-admitted unit is a no-op.
    pub fn admit(&mut self, unit: Unit) -> Result<Admission, ComplianceError> {
        let digest = unit.digest();
        if let Some(&id) = self.by_digest.get(&digest) {
            return Ok(Admission::Existing(id));
        }

        let (parent_ids, staged) = compliance::check(self, &unit)?;

        let id = self.records.len();
        let creator = unit.creator as usize;
        let self_predecessor = parent_ids.first().copied();
        let mut floor = staged.floor;
        floor[creator] = vec![id];

        self.by_digest.insert(digest, id);
        let rows = &mut self.by_creator[creator];
        let height = staged.height as usize;
        let mut newly_forked = false;
        if rows.len() == height {
            rows.push(vec![id]);
        } else {
            // A sibling at this height already exists: the creator forked.
            rows[height].push(id);
            if !self.forkers[creator] {
                self.forkers[creator] = true;
                newly_forked = true;
            }
        }

        if let Some(predecessor) = self_predecessor {
            self.maximal[creator].retain(|&m| m != predecessor);
        }
        self.maximal[creator].push(id);

        let level = staged.level as usize;
        if self.by_level.len() <= level {
            self.by_level.resize(level + 1, Vec::new());
            self.primes.resize(level + 1, Vec::new());
        }
        self.by_level[level].push(id);
        if staged.prime {
            self.primes[level].push(id);
        }

        self.records.push(Record {
            unit,
            digest,
            parents: parent_ids,
            self_predecessor,
            height: staged.height,
            level: staged.level,
            prime: staged.prime,
            floor,
        });

        Ok(Admission::Added { id, newly_forked })
    }
}
