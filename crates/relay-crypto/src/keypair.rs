use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::error::CryptoError;

const RSA_BITS: usize = 2048;
const AES_KEY_LEN: usize = 32;

/// The server's long-lived RSA key pair, used once per session to unwrap
/// the AES-256 channel key the client generates locally.
///
/// One instance is shared by the whole process; `unwrap_session_key` takes
/// `&self` rather than `&mut self` since RSA decryption has no mutable
/// state, so concurrent sessions can unwrap keys through the same
/// `Arc<ServerIdentity>` without contention beyond what the allocator
/// imposes.
pub struct ServerIdentity {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl ServerIdentity {
    /// Generates a fresh 2048-bit key pair. Expensive (tens of
    /// milliseconds); call once at startup, not per connection.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::PublicKeyEncoding(e.to_string()))?;

        Ok(Self {
            private_key,
            public_key_pem,
        })
    }

    /// Builds an identity from an already-generated private key. Used by
    /// tests that need a deterministic key pair instead of paying the
    /// generation cost per test.
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::PublicKeyEncoding(e.to_string()))?;
        Ok(Self {
            private_key,
            public_key_pem,
        })
    }

    /// The SubjectPublicKeyInfo PEM block sent to clients inside the
    /// `init` signaling record, as a plain PEM string. The record itself
    /// base64-encodes this string again for JSON transport, per the
    /// existing wire contract.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Unwraps the AES-256 channel key a client sent in an
    /// `aes_key_exchange` record's `encrypted_key` field.
    ///
    /// The field is base64 of an RSA PKCS#1v1.5 ciphertext. Decrypting it
    /// yields not the raw 32 key bytes but a base64 string of them — the
    /// client encrypts `base64(key)`, not `key`, so unwrapping must
    /// base64-decode twice. This quirk is load-bearing: it's how the
    /// existing browser client packs the key, and changing it would break
    /// wire compatibility.
    pub fn unwrap_session_key(&self, encrypted_key_b64: &str) -> Result<Zeroizing<[u8; AES_KEY_LEN]>, CryptoError> {
        let ciphertext = BASE64.decode(encrypted_key_b64)?;
        let inner_b64 = Zeroizing::new(
            self.private_key
                .decrypt(Pkcs1v15Encrypt, &ciphertext)
                .map_err(|e| CryptoError::RsaDecrypt(e.to_string()))?,
        );
        let inner_b64 = std::str::from_utf8(&inner_b64)
            .map_err(|e| CryptoError::RsaDecrypt(e.to_string()))?;
        let key_bytes = Zeroizing::new(BASE64.decode(inner_b64.trim())?);

        if key_bytes.len() != AES_KEY_LEN {
            return Err(CryptoError::BadKeyLength {
                actual: key_bytes.len(),
            });
        }

        let mut key = Zeroizing::new([0u8; AES_KEY_LEN]);
        key.copy_from_slice(&key_bytes);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> ServerIdentity {
        // A fixed small-ish key would weaken the test; pay full generation
        // cost so the unwrap path matches production RSA parameters.
        ServerIdentity::generate().unwrap()
    }

    #[test]
    fn public_key_pem_is_well_formed() {
        let identity = test_identity();
        assert!(identity.public_key_pem().starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn unwraps_double_base64_key_exchange() {
        let identity = test_identity();
        let public_key = RsaPublicKey::from(&identity.private_key);

        let aes_key = [7u8; AES_KEY_LEN];
        let key_b64 = BASE64.encode(aes_key);

        let mut rng = rand::thread_rng();
        let ciphertext = public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, key_b64.as_bytes())
            .unwrap();
        let encrypted_key_b64 = BASE64.encode(ciphertext);

        let unwrapped = identity.unwrap_session_key(&encrypted_key_b64).unwrap();
        assert_eq!(*unwrapped, aes_key);
    }

    #[test]
    fn rejects_wrong_length_key() {
        let identity = test_identity();
        let public_key = RsaPublicKey::from(&identity.private_key);

        let short_key_b64 = BASE64.encode([1u8; 16]);
        let mut rng = rand::thread_rng();
        let ciphertext = public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, short_key_b64.as_bytes())
            .unwrap();
        let encrypted_key_b64 = BASE64.encode(ciphertext);

        let err = identity.unwrap_session_key(&encrypted_key_b64).unwrap_err();
        assert!(matches!(err, CryptoError::BadKeyLength { actual: 16 }));
    }
}
