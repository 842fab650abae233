//! P-256 ECDH provider backed by [*ring*].
//!
//! *ring* does not support `#![no_std]`, so this provider is only useful for tests and other
//! non-embedded usage (eg. a Linux host implementation of the stack). Enabled via the `ring`
//! Cargo feature.
//!
//! [*ring*]: https://github.com/briansmith/ring

use super::{EcdhProvider, InvalidPublicKey, PublicKey, SecretKey, SharedSecret};
use core::cell::RefCell;
use rand_core::{CryptoRng, RngCore};
use ring::{agreement, rand::SecureRandom};

/// [`EcdhProvider`] implementation backed by *ring*'s P-256 agreement primitives.
pub struct RingProvider;

impl EcdhProvider for RingProvider {
    type SecretKey = RingSecretKey;

    fn generate_keypair<R>(&mut self, rng: &mut R) -> (Self::SecretKey, PublicKey)
    where
        R: RngCore + CryptoRng,
    {
        let shim = RngShim(RefCell::new(rng));
        let private = agreement::EphemeralPrivateKey::generate(&agreement::ECDH_P256, &shim)
            .expect("failed to generate P-256 key pair");
        let public = private
            .compute_public_key()
            .expect("failed to compute public key");

        let mut raw = [0; 64];
        // `public.as_ref()` is the uncompressed SEC1 encoding, including the leading `0x04` byte.
        raw.copy_from_slice(&public.as_ref()[1..]);

        (RingSecretKey(private), PublicKey(raw))
    }
}

/// Secret key type used by [`RingProvider`].
///
/// *ring* enforces single-use ephemeral keys via Rust's ownership system, which lines up nicely
/// with [`SecretKey::agree`] taking `self` by value.
pub struct RingSecretKey(agreement::EphemeralPrivateKey);

impl SecretKey for RingSecretKey {
    fn agree(self, foreign_key: &PublicKey) -> Result<SharedSecret, InvalidPublicKey> {
        let mut encoded = [0u8; 65];
        encoded[0] = 0x04;
        encoded[1..].copy_from_slice(&foreign_key.0);

        let peer = agreement::UnparsedPublicKey::new(&agreement::ECDH_P256, &encoded[..]);

        agreement::agree_ephemeral(self.0, &peer, InvalidPublicKey::new(), |shared| {
            let mut out = [0; 32];
            out.copy_from_slice(shared);
            Ok(SharedSecret(out))
        })
    }
}

/// Adapts a `RngCore + CryptoRng` to *ring*'s `SecureRandom` trait.
///
/// `SecureRandom::fill` only takes `&self`, so the wrapped RNG sits behind a `RefCell`.
struct RngShim<'a, R>(RefCell<&'a mut R>);

impl<'a, R: RngCore + CryptoRng> SecureRandom for RngShim<'a, R> {
    fn fill(&self, dest: &mut [u8]) -> Result<(), ring::error::Unspecified> {
        self.0.borrow_mut().fill_bytes(dest);
        Ok(())
    }
}
