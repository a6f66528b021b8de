//! The threshold coin and the common random permutation.
//!
//! Prime units at or above the coin level carry a share of a threshold
//! signature over their level. Once a quorum of shares is reachable, any
//! subset of them recovers the same signature, which seeds the timing-unit
//! election for that level. The permutation over committee indices is derived
//! purely from public data (hex-encoded public keys and the level), so every
//! process computes the same one.

use commonware_cryptography::{
    bls12381::primitives::{
        group,
        ops::{partial_sign_message, partial_verify_message, threshold_signature_recover,
              verify_message},
        sharing::Sharing,
        variant::MinSig,
    },
    ed25519::PublicKey,
    sha256::Sha256,
    Hasher,
};
use commonware_utils::hex;
use lattice_types::{coin_namespace, CoinShare, Identity, ThresholdSignature};

fn message(level: u64) -> [u8; 8] {
    level.to_be_bytes()
}

/// Produce this process's share over `level`.
pub fn sign_share(share: &group::Share, level: u64) -> CoinShare {
    let namespace = coin_namespace();
    partial_sign_message::<MinSig>(share, Some(&namespace), &message(level))
}

/// Verify a share over `level` against the committee polynomial.
pub fn verify_share(polynomial: &Sharing<MinSig>, level: u64, share: &CoinShare) -> bool {
    let namespace = coin_namespace();
    partial_verify_message::<MinSig>(polynomial, Some(&namespace), &message(level), share).is_ok()
}

/// Recover the combined signature over `level` from at least `threshold`
/// shares and verify it against the committee identity.
pub fn combine(
    identity: &Identity,
    threshold: u32,
    level: u64,
    shares: &[CoinShare],
) -> Option<ThresholdSignature> {
    if (shares.len() as u32) < threshold {
        return None;
    }
    let signature = threshold_signature_recover::<MinSig, _>(threshold, shares).ok()?;
    let namespace = coin_namespace();
    verify_message::<MinSig>(identity, Some(&namespace), &message(level), &signature).ok()?;
    Some(signature)
}

/// The common random permutation of committee indices for `level`, derived
/// from the hex-encoded public keys and the level alone.
pub fn permutation(publics: &[PublicKey], level: u64) -> Vec<u32> {
    let mut hasher = Sha256::new();
    for public in publics {
        hasher.update(hex(public.as_ref()).as_bytes());
    }
    hasher.update(&level.to_be_bytes());
    let seed = hasher.finalize();

    let mut indices: Vec<u32> = (0..publics.len() as u32).collect();
    indices.sort_by_cached_key(|index| {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_ref());
        hasher.update(&index.to_be_bytes());
        hasher.finalize().as_ref().to_vec()
    });
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_cryptography::{
        bls12381::{dkg::deal_anonymous, primitives::sharing::Mode},
        ed25519::PrivateKey,
        PrivateKeyExt, Signer,
    };
    use commonware_utils::{quorum, NZU32};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_share_sign_verify() {
        let mut rng = StdRng::seed_from_u64(42);
        let (polynomial, shares) = deal_anonymous::<MinSig>(&mut rng, Mode::default(), NZU32!(4));
        let share = sign_share(&shares[2], 5);
        assert_eq!(share.index, 2);
        assert!(verify_share(&polynomial, 5, &share));
        assert!(!verify_share(&polynomial, 6, &share));
    }

    #[test]
    fn test_combine_is_subset_independent() {
        let n = 4;
        let threshold = quorum(n);
        let mut rng = StdRng::seed_from_u64(42);
        let (polynomial, shares) =
            deal_anonymous::<MinSig>(&mut rng, Mode::default(), NZU32!(n));
        let identity = *polynomial.public();

        let all: Vec<CoinShare> = shares.iter().map(|share| sign_share(share, 9)).collect();
        let first = combine(&identity, threshold, 9, &all[0..3]).expect("combine");
        let second = combine(&identity, threshold, 9, &all[1..4]).expect("combine");
        assert_eq!(first, second);

        // Too few shares recover nothing.
        assert!(combine(&identity, threshold, 9, &all[0..2]).is_none());
    }

    #[test]
    fn test_permutation_deterministic_and_complete() {
        let publics: Vec<_> = (0..7)
            .map(|seed| PrivateKey::from_seed(seed).public_key())
            .collect();
        let first = permutation(&publics, 3);
        let second = permutation(&publics, 3);
        assert_eq!(first, second);

        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..7).collect::<Vec<u32>>());

        // Different levels shuffle differently (with overwhelming probability
        // for this committee size).
        let other = permutation(&publics, 4);
        assert_ne!(first, other);
    }
}
