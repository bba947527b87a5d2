use thiserror::Error;

/// Errors raised during key exchange or channel encryption/decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to generate RSA key pair: {0}")]
    KeyGeneration(String),

    #[error("failed to encode public key: {0}")]
    PublicKeyEncoding(String),

    #[error("wrapped key is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("RSA unwrap failed: {0}")]
    RsaDecrypt(String),

    #[error("unwrapped key has length {actual}, expected 32 bytes for AES-256")]
    BadKeyLength { actual: usize },

    #[error("ciphertext shorter than the {0}-byte nonce prefix")]
    CiphertextTooShort(usize),

    #[error("AEAD open failed: authentication tag did not verify")]
    Unauthenticated,
}
