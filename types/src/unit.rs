//! Units: the signed vertices of the poset.
//!
//! A unit commits to its creator, its parents (by digest, the first being the
//! creator's own previous unit when one exists), the transfers it carries, and
//! an optional coin share. The signature covers the canonical encoding of all
//! of those fields; the digest covers the full record including the signature
//! and is the unit's identity everywhere (indices, wire, ordering).
//!
//! Height, level, primality, and dominator summaries are not part of the
//! record: they are derived by the poset when the unit is admitted.

use crate::{unit_namespace, CoinShare, Transaction};
use bytes::{Buf, BufMut};
use commonware_codec::{Encode, EncodeSize, Error, RangeCfg, Read, ReadExt, ReadRangeExt, Write};
use commonware_cryptography::{
    ed25519::{self, PublicKey},
    sha256::{Digest, Sha256},
    Digestible, Hasher, Signer, Verifier,
};

/// The maximum number of parents a unit may reference.
pub const MAX_UNIT_PARENTS: usize = 64;

/// The maximum number of transfers a unit may carry.
pub const MAX_UNIT_TRANSACTIONS: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    /// Committee index of the process that produced this unit.
    pub creator: u32,
    /// Digests of the parents. Empty for a genesis unit; otherwise the first
    /// entry is the creator's self-predecessor.
    pub parents: Vec<Digest>,
    pub transactions: Vec<Transaction>,
    /// Coin share over this unit's level, present exactly when the unit is a
    /// prime at or above the coin level.
    pub coin_share: Option<CoinShare>,

    pub signature: ed25519::Signature,

    digest: Digest,
}

impl Unit {
    fn write_payload(
        creator: &u32,
        parents: &Vec<Digest>,
        transactions: &Vec<Transaction>,
        coin_share: &Option<CoinShare>,
        payload: &mut Vec<u8>,
    ) {
        payload.clear();
        creator.write(payload);
        parents.write(payload);
        transactions.write(payload);
        match coin_share {
            Some(share) => {
                1u8.write(payload);
                share.write(payload);
            }
            None => 0u8.write(payload),
        }
    }

    fn compute_digest(
        creator: &u32,
        parents: &Vec<Digest>,
        transactions: &Vec<Transaction>,
        coin_share: &Option<CoinShare>,
        signature: &ed25519::Signature,
    ) -> Digest {
        let mut payload = Vec::new();
        Self::write_payload(creator, parents, transactions, coin_share, &mut payload);
        let mut hasher = Sha256::new();
        hasher.update(payload.as_slice());
        hasher.update(signature.encode().as_ref());
        hasher.finalize()
    }

    /// Build and sign a unit.
    pub fn sign(
        private: &ed25519::PrivateKey,
        creator: u32,
        parents: Vec<Digest>,
        transactions: Vec<Transaction>,
        coin_share: Option<CoinShare>,
    ) -> Self {
        let mut payload = Vec::new();
        Self::write_payload(
            &creator,
            &parents,
            &transactions,
            &coin_share,
            &mut payload,
        );
        let namespace = unit_namespace();
        let signature = private.sign(&namespace, payload.as_slice());
        let digest =
            Self::compute_digest(&creator, &parents, &transactions, &coin_share, &signature);

        Self {
            creator,
            parents,
            transactions,
            coin_share,
            signature,
            digest,
        }
    }

    /// Verify the creator's signature over the unit's signed payload.
    pub fn verify(&self, public: &PublicKey) -> bool {
        let mut payload = Vec::new();
        Self::write_payload(
            &self.creator,
            &self.parents,
            &self.transactions,
            &self.coin_share,
            &mut payload,
        );
        let namespace = unit_namespace();
        public.verify(&namespace, payload.as_slice(), &self.signature)
    }

    /// Digest of the creator's self-predecessor, if the unit has one.
    pub fn self_predecessor(&self) -> Option<&Digest> {
        self.parents.first()
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }
}

impl Write for Unit {
    fn write(&self, writer: &mut impl BufMut) {
        self.creator.write(writer);
        self.parents.write(writer);
        self.transactions.write(writer);
        match &self.coin_share {
            Some(share) => {
                1u8.write(writer);
                share.write(writer);
            }
            None => 0u8.write(writer),
        }
        self.signature.write(writer);
    }
}

impl Read for Unit {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let creator = u32::read(reader)?;
        let parents = Vec::<Digest>::read_range(reader, 0..=MAX_UNIT_PARENTS)?;
        let transactions = Vec::<Transaction>::read_cfg(
            reader,
            &(RangeCfg::from(0..=MAX_UNIT_TRANSACTIONS), ()),
        )?;
        let coin_share = match u8::read(reader)? {
            0 => None,
            1 => Some(CoinShare::read(reader)?),
            tag => return Err(Error::InvalidEnum(tag)),
        };
        let signature = ed25519::Signature::read(reader)?;

        // Pre-compute the digest
        let digest = Self::compute_digest(
            &creator,
            &parents,
            &transactions,
            &coin_share,
            &signature,
        );
        Ok(Self {
            creator,
            parents,
            transactions,
            coin_share,
            signature,
            digest,
        })
    }
}

impl EncodeSize for Unit {
    fn encode_size(&self) -> usize {
        self.creator.encode_size()
            + self.parents.encode_size()
            + self.transactions.encode_size()
            + 1
            + self
                .coin_share
                .as_ref()
                .map(|share| share.encode_size())
                .unwrap_or(0)
            + self.signature.encode_size()
    }
}

impl Digestible for Unit {
    type Digest = Digest;

    fn digest(&self) -> Digest {
        self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::DecodeExt;
    use commonware_cryptography::{ed25519::PrivateKey, PrivateKeyExt};

    fn transfer(seed: u64) -> Transaction {
        let issuer = PrivateKey::from_seed(seed);
        let receiver = PrivateKey::from_seed(seed + 1).public_key();
        Transaction::sign(&issuer, 0, receiver, 10)
    }

    #[test]
    fn test_genesis_round_trip_preserves_digest() {
        let private = PrivateKey::from_seed(0);
        let unit = Unit::sign(&private, 0, Vec::new(), Vec::new(), None);
        assert!(unit.is_genesis());
        assert!(unit.verify(&private.public_key()));

        let decoded = Unit::decode(unit.encode().as_ref()).expect("decode");
        assert_eq!(decoded, unit);
        assert_eq!(decoded.digest(), unit.digest());
    }

    #[test]
    fn test_round_trip_with_parents_and_transactions() {
        let private = PrivateKey::from_seed(0);
        let genesis = Unit::sign(&private, 0, Vec::new(), Vec::new(), None);
        let other = Unit::sign(&PrivateKey::from_seed(1), 1, Vec::new(), Vec::new(), None);
        let unit = Unit::sign(
            &private,
            0,
            vec![genesis.digest(), other.digest()],
            vec![transfer(10), transfer(20)],
            None,
        );
        assert_eq!(unit.self_predecessor(), Some(&genesis.digest()));

        let decoded = Unit::decode(unit.encode().as_ref()).expect("decode");
        assert_eq!(decoded, unit);
        assert_eq!(decoded.digest(), unit.digest());
        assert!(decoded.verify(&private.public_key()));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let private = PrivateKey::from_seed(0);
        let unit = Unit::sign(&private, 0, Vec::new(), Vec::new(), None);
        assert!(!unit.verify(&PrivateKey::from_seed(1).public_key()));
    }

    #[test]
    fn test_distinct_parents_distinct_digests() {
        let private = PrivateKey::from_seed(0);
        let genesis = Unit::sign(&private, 0, Vec::new(), Vec::new(), None);
        let a = Unit::sign(&private, 0, vec![genesis.digest()], Vec::new(), None);
        let b = Unit::sign(&private, 0, Vec::new(), Vec::new(), None);
        assert_ne!(a.digest(), b.digest());
    }
}
