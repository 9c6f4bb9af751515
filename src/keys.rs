//! Curve25519 key pairs for the gateway and its clients
//!
//! Keys are 32 raw bytes, carried as standard base64 text in the registry
//! and in the gateway config file.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

/// Length of a raw curve25519 key
pub const KEY_LEN: usize = 32;

/// X25519 key pair
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair from the OS entropy source
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| Error::CryptoFailure(format!("OS random source unavailable: {}", e)))?;
        let secret = StaticSecret::from(bytes);
        bytes.fill(0);
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    /// Rebuild a key pair from a base64-encoded private key
    pub fn from_private_base64(b64: &str) -> Result<Self> {
        let bytes = decode_key(b64)?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    /// Get the private key as base64 string
    pub fn private_key_base64(&self) -> String {
        BASE64.encode(self.secret.to_bytes())
    }

    /// Get the public key as base64 string
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.public.as_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

/// Validate a base64-encoded key and return it trimmed
pub fn parse_key(b64: &str) -> Result<String> {
    decode_key(b64)?;
    Ok(b64.trim().to_string())
}

fn decode_key(b64: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = BASE64
        .decode(b64.trim())
        .map_err(|e| Error::InvalidKey(format!("not valid base64: {}", e)))?;
    if bytes.len() != KEY_LEN {
        return Err(Error::InvalidKey(format!(
            "invalid key length: {} (expected {})",
            bytes.len(),
            KEY_LEN
        )));
    }
    let mut arr = [0u8; KEY_LEN];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
