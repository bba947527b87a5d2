//! Relay cryptographic layer: RSA key wrap for the initial handshake and
//! the AES-256-GCM cipher used for the encrypted channel afterward.

pub mod cipher;
pub mod error;
pub mod keypair;

pub use cipher::Cipher;
pub use error::CryptoError;
pub use keypair::ServerIdentity;
