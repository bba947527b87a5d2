use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::CryptoError;

/// The per-session channel cipher, keyed by the AES-256 key unwrapped from
/// the client's `aes_key_exchange` record.
///
/// Every encrypted message on the wire is `nonce || ciphertext+tag`: the
/// 12-byte GCM nonce is generated fresh per call and prefixed to the sealed
/// body rather than tracked as running state, so `Cipher` needs no
/// sequence counter and is safe to use from either direction of a session
/// without coordination.
pub struct Cipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl Cipher {
    pub fn new(key_bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| CryptoError::RsaDecrypt("invalid AES-256-GCM key length".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypts `plaintext` with no associated data, returning
    /// `nonce || ciphertext+tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Unauthenticated)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Unauthenticated)?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    /// Splits the nonce prefix from `data` and authenticated-decrypts the
    /// remainder with no associated data.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::CiphertextTooShort(NONCE_LEN));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let mut nonce_array = [0u8; NONCE_LEN];
        nonce_array.copy_from_slice(nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_array);

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Unauthenticated)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::new([3u8; 32]).unwrap()
    }

    #[test]
    fn round_trip() {
        let cipher = cipher();
        let sealed = cipher.seal(b"hello relay").unwrap();
        let opened = cipher.open(&sealed).unwrap();
        assert_eq!(opened, b"hello relay");
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = cipher().seal(b"secret frame").unwrap();
        let other = Cipher::new([9u8; 32]).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let cipher = cipher();
        let mut sealed = cipher.seal(b"integrity matters").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.open(&sealed).is_err());
    }

    #[test]
    fn truncated_ciphertext_is_rejected_cleanly() {
        let cipher = cipher();
        let err = cipher.open(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, CryptoError::CiphertextTooShort(NONCE_LEN_CONST) if NONCE_LEN_CONST == 12));
    }

    #[test]
    fn nonces_differ_between_calls() {
        let cipher = cipher();
        let a = cipher.seal(b"same plaintext").unwrap();
        let b = cipher.seal(b"same plaintext").unwrap();
        assert_ne!(&a[..12], &b[..12]);
    }
}
