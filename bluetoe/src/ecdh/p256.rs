//! P-256 ECDH provider backed by the pure-Rust [`p256`] crate.
//!
//! This is the provider used by default (the `ring` feature pulls in [`super::ring`] instead,
//! which requires `std`). It operates directly on the curve arithmetic exposed by the `p256`
//! crate's `arithmetic` feature, since the crate did not yet expose a higher-level ECDH API at the
//! pinned version.

use super::{EcdhProvider, InvalidPublicKey, PublicKey, SecretKey, SharedSecret};
use core::convert::TryInto;
use p256::arithmetic::{AffinePoint, ProjectivePoint, Scalar};
use rand_core::{CryptoRng, RngCore};

/// [`EcdhProvider`] implementation using the pure-Rust `p256` crate.
///
/// Always available, does not require `std` or a hardware crypto accelerator.
pub struct P256Provider;

impl EcdhProvider for P256Provider {
    type SecretKey = P256SecretKey;

    fn generate_keypair<R>(&mut self, rng: &mut R) -> (Self::SecretKey, PublicKey)
    where
        R: RngCore + CryptoRng,
    {
        let scalar = loop {
            let mut raw = [0u8; 32];
            rng.fill_bytes(&mut raw);
            if let Some(scalar) = Scalar::from_bytes(raw).into() {
                if bool::from(!scalar.is_zero()) {
                    break scalar;
                }
            }
        };

        let point = ProjectivePoint::generator() * &scalar;
        let public = encode_point(&point.to_affine().unwrap());

        (P256SecretKey(scalar), PublicKey(public))
    }
}

/// Secret key type used by [`P256Provider`].
pub struct P256SecretKey(Scalar);

impl SecretKey for P256SecretKey {
    fn agree(self, foreign_key: &PublicKey) -> Result<SharedSecret, InvalidPublicKey> {
        let affine = decode_point(foreign_key).ok_or_else(InvalidPublicKey::new)?;
        let shared = (ProjectivePoint::from(affine) * &self.0)
            .to_affine()
            .ok_or_else(InvalidPublicKey::new)?;

        Ok(SharedSecret(encode_x(&shared)))
    }
}

/// Encodes an affine point as the raw, uncompressed `(X || Y)` byte representation used
/// throughout this module (ie. without the SEC1 `0x04` prefix byte).
fn encode_point(point: &AffinePoint) -> [u8; 64] {
    let encoded = point.to_uncompressed_bytes();
    let mut out = [0; 64];
    out.copy_from_slice(&encoded.as_ref()[1..]);
    out
}

/// Returns just the encoded `X` coordinate of `point`, as used for the ECDH shared secret.
fn encode_x(point: &AffinePoint) -> [u8; 32] {
    encode_point(point)[..32].try_into().unwrap()
}

/// Decodes a [`PublicKey`] into a curve point, rejecting the point at infinity and any point not
/// on the curve.
fn decode_point(key: &PublicKey) -> Option<AffinePoint> {
    let mut encoded = [0u8; 65];
    encoded[0] = 0x04;
    encoded[1..].copy_from_slice(&key.0);

    let point = AffinePoint::from_uncompressed_bytes(&encoded.into())?;
    if bool::from(point.is_identity()) {
        None
    } else {
        Some(point)
    }
}
