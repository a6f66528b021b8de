//! Shared schema types for lattice.
//!
//! This crate defines the wire and state schema used across the workspace
//! (`unit`, `transaction`, `wire`) and re-exports it as a single public
//! surface.
//!
//! ## Stability and compatibility
//! Anything re-exported from this crate should be treated as public API. All
//! encodings are consensus-critical: units are hashed and signed over their
//! canonical byte encoding, so any change to a `Write` impl is a hard fork.

use commonware_cryptography::bls12381::primitives::variant::{MinSig, PartialSignature, Variant};
use commonware_utils::union;

pub mod transaction;
pub mod unit;
pub mod wire;

pub use transaction::*;
pub use unit::*;
pub use wire::*;

/// Domain separator prefixed (via [union]) to every signed message.
pub const NAMESPACE: &[u8] = b"_LATTICE";
const UNIT_SUFFIX: &[u8] = b"_UNIT";
const TRANSACTION_SUFFIX: &[u8] = b"_TX";
const COIN_SUFFIX: &[u8] = b"_COIN";

/// The group public key all combined coin signatures verify against.
pub type Identity = <MinSig as Variant>::Public;

/// An evaluation of the committee polynomial at a participant index.
pub type Evaluation = Identity;

/// A combined threshold signature.
pub type ThresholdSignature = <MinSig as Variant>::Signature;

/// A single participant's share of a threshold signature.
pub type CoinShare = PartialSignature<MinSig>;

#[inline]
pub fn unit_namespace() -> Vec<u8> {
    union(NAMESPACE, UNIT_SUFFIX)
}

#[inline]
pub fn transaction_namespace() -> Vec<u8> {
    union(NAMESPACE, TRANSACTION_SUFFIX)
}

#[inline]
pub fn coin_namespace() -> Vec<u8> {
    union(NAMESPACE, COIN_SUFFIX)
}
