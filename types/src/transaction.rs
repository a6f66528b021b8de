//! Signed account-to-account transfers carried inside units.
//!
//! A transfer moves `amount` from the issuer to the receiver and is replay
//! protected by a per-issuer `index` that must advance by exactly one on each
//! applied transfer. Validity against balances is decided by the ledger, not
//! here; this module only defines the record, its canonical encoding, and its
//! signature.

use crate::transaction_namespace;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use commonware_cryptography::{
    ed25519::{self, PublicKey},
    sha256::{Digest, Sha256},
    Digestible, Hasher, Signer, Verifier,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Index of this transfer in the issuer's sequence (0 for the first).
    pub index: u64,
    pub receiver: PublicKey,
    pub amount: u64,

    pub issuer: PublicKey,
    pub signature: ed25519::Signature,
}

impl Transaction {
    fn write_payload(index: &u64, receiver: &PublicKey, amount: &u64, payload: &mut Vec<u8>) {
        payload.clear();
        payload.reserve(index.encode_size() + receiver.encode_size() + amount.encode_size());
        index.write(payload);
        receiver.write(payload);
        amount.write(payload);
    }

    pub fn sign(
        private: &ed25519::PrivateKey,
        index: u64,
        receiver: PublicKey,
        amount: u64,
    ) -> Self {
        let mut payload = Vec::new();
        Self::write_payload(&index, &receiver, &amount, &mut payload);
        let namespace = transaction_namespace();
        let signature = private.sign(&namespace, payload.as_slice());

        Self {
            index,
            receiver,
            amount,
            issuer: private.public_key(),
            signature,
        }
    }

    pub fn verify(&self) -> bool {
        let mut payload = Vec::new();
        Self::write_payload(&self.index, &self.receiver, &self.amount, &mut payload);
        let namespace = transaction_namespace();
        self.issuer
            .verify(&namespace, payload.as_slice(), &self.signature)
    }
}

impl Write for Transaction {
    fn write(&self, writer: &mut impl BufMut) {
        self.index.write(writer);
        self.receiver.write(writer);
        self.amount.write(writer);
        self.issuer.write(writer);
        self.signature.write(writer);
    }
}

impl Read for Transaction {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let index = u64::read(reader)?;
        let receiver = PublicKey::read(reader)?;
        let amount = u64::read(reader)?;
        let issuer = PublicKey::read(reader)?;
        let signature = ed25519::Signature::read(reader)?;

        Ok(Self {
            index,
            receiver,
            amount,
            issuer,
            signature,
        })
    }
}

impl EncodeSize for Transaction {
    fn encode_size(&self) -> usize {
        self.index.encode_size()
            + self.receiver.encode_size()
            + self.amount.encode_size()
            + self.issuer.encode_size()
            + self.signature.encode_size()
    }
}

impl Digestible for Transaction {
    type Digest = Digest;

    fn digest(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_be_bytes().as_ref());
        hasher.update(self.receiver.as_ref());
        hasher.update(self.amount.to_be_bytes().as_ref());
        hasher.update(self.issuer.as_ref());
        // The signature is not part of the digest (any valid signature is
        // valid for the transfer).
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use commonware_cryptography::{ed25519::PrivateKey, PrivateKeyExt};

    #[test]
    fn test_sign_verify() {
        let issuer = PrivateKey::from_seed(1);
        let receiver = PrivateKey::from_seed(2).public_key();
        let tx = Transaction::sign(&issuer, 0, receiver, 100);
        assert!(tx.verify());
    }

    #[test]
    fn test_tampered_amount_fails_verification() {
        let issuer = PrivateKey::from_seed(1);
        let receiver = PrivateKey::from_seed(2).public_key();
        let mut tx = Transaction::sign(&issuer, 0, receiver, 100);
        tx.amount = 1_000;
        assert!(!tx.verify());
    }

    #[test]
    fn test_codec_round_trip_preserves_digest() {
        let issuer = PrivateKey::from_seed(1);
        let receiver = PrivateKey::from_seed(2).public_key();
        let tx = Transaction::sign(&issuer, 7, receiver, 42);
        let decoded = Transaction::decode(tx.encode().as_ref()).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.digest(), tx.digest());
    }

    #[test]
    fn test_digest_ignores_signature() {
        let issuer = PrivateKey::from_seed(1);
        let receiver = PrivateKey::from_seed(2).public_key();
        let a = Transaction::sign(&issuer, 3, receiver.clone(), 9);
        let mut b = Transaction::sign(&issuer, 3, receiver, 9);
        b.signature = a.signature.clone();
        assert_eq!(a.digest(), b.digest());
    }
}
