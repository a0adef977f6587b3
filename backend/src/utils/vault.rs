//! Envelope protection for stored upstream refresh tokens.
//!
//! A session row never holds the raw upstream token: it carries a one-way
//! digest for cheap integrity checks plus a sealed AES-256-GCM copy that is
//! the only recoverable form. Key material sits behind the [`Keyring`]
//! trait; the envelope encoding records which key sealed each value so
//! ciphertexts survive a key-provider swap.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LENGTH: usize = 12;
const ENVELOPE_SCHEME: &str = "sealed";
const ENVELOPE_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("stored envelope is malformed")]
    InvalidEnvelope,
    #[error("envelope was sealed under unknown key {0}")]
    UnknownKey(String),
    #[error("envelope decryption failed")]
    DecryptionFailed,
}

/// A sealed value: `sealed:v1:<key_id>:<nonce>:<ciphertext>`.
pub struct SealedToken {
    pub key_id: String,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl SealedToken {
    pub fn encode(&self) -> Result<String> {
        if self.nonce.len() != NONCE_LENGTH {
            return Err(anyhow!("invalid nonce length"));
        }
        Ok(format!(
            "{}:{}:{}:{}:{}",
            ENVELOPE_SCHEME,
            ENVELOPE_VERSION,
            self.key_id,
            STANDARD_NO_PAD.encode(&self.nonce),
            STANDARD_NO_PAD.encode(&self.ciphertext)
        ))
    }

    pub fn parse(stored: &str) -> Result<Self, VaultError> {
        let parts: Vec<&str> = stored.split(':').collect();
        let (key_id, nonce_part, cipher_part) = match parts.as_slice() {
            ["sealed", "v1", key_id, nonce, cipher] => (key_id.to_string(), *nonce, *cipher),
            _ => return Err(VaultError::InvalidEnvelope),
        };

        let nonce = STANDARD_NO_PAD
            .decode(nonce_part)
            .map_err(|_| VaultError::InvalidEnvelope)?;
        if nonce.len() != NONCE_LENGTH {
            return Err(VaultError::InvalidEnvelope);
        }

        let ciphertext = STANDARD_NO_PAD
            .decode(cipher_part)
            .map_err(|_| VaultError::InvalidEnvelope)?;

        Ok(Self {
            key_id,
            nonce,
            ciphertext,
        })
    }
}

pub trait Keyring: Send + Sync {
    fn key_id(&self) -> &str;
    fn seal(&self, plaintext: &[u8]) -> Result<SealedToken>;
    fn open(&self, sealed: &SealedToken) -> Result<Vec<u8>, VaultError>;
}

/// Keyring holding a single AES-256 key derived from the configured master
/// secret and key id. Stands in for an external KMS behind the same trait.
pub struct DerivedKeyring {
    key_id: String,
    key: [u8; 32],
}

impl DerivedKeyring {
    pub fn new(master_secret: &str, key_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(master_secret.as_bytes());
        hasher.update(b"|");
        hasher.update(key_id.as_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self {
            key_id: key_id.to_string(),
            key,
        }
    }
}

impl Keyring for DerivedKeyring {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn seal(&self, plaintext: &[u8]) -> Result<SealedToken> {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| anyhow!("invalid key"))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| anyhow!("encryption failed"))?;

        Ok(SealedToken {
            key_id: self.key_id.clone(),
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    fn open(&self, sealed: &SealedToken) -> Result<Vec<u8>, VaultError> {
        if sealed.key_id != self.key_id {
            return Err(VaultError::UnknownKey(sealed.key_id.clone()));
        }
        if sealed.nonce.len() != NONCE_LENGTH {
            return Err(VaultError::InvalidEnvelope);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| VaultError::DecryptionFailed)?;
        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
            .map_err(|_| VaultError::DecryptionFailed)
    }
}

/// Hashing and sealing facade used by the session store.
pub struct TokenVault {
    keyring: Box<dyn Keyring>,
}

impl TokenVault {
    pub fn new(keyring: Box<dyn Keyring>) -> Self {
        Self { keyring }
    }

    /// One-way digest of a raw upstream token (hex SHA-256).
    pub fn digest(&self, raw: &str) -> String {
        hex::encode(Sha256::digest(raw.as_bytes()))
    }

    /// Seals a raw upstream token into its stored envelope form.
    pub fn seal(&self, raw: &str) -> Result<String> {
        self.keyring.seal(raw.as_bytes())?.encode()
    }

    /// Opens a stored envelope back into the raw upstream token.
    pub fn open(&self, stored: &str) -> Result<String, VaultError> {
        let sealed = SealedToken::parse(stored)?;
        let plaintext = self.keyring.open(&sealed)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> TokenVault {
        TokenVault::new(Box::new(DerivedKeyring::new("master-secret", "local")))
    }

    #[test]
    fn seal_and_open_round_trip() {
        let vault = vault();
        let sealed = vault.seal("upstream-refresh-token").expect("seal");
        assert!(sealed.starts_with("sealed:v1:local:"));
        assert_eq!(vault.open(&sealed).expect("open"), "upstream-refresh-token");
    }

    #[test]
    fn sealing_twice_yields_distinct_ciphertexts() {
        let vault = vault();
        let a = vault.seal("upstream-refresh-token").unwrap();
        let b = vault.seal("upstream-refresh-token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn corrupting_the_ciphertext_fails_decryption() {
        let vault = vault();
        let sealed = vault.seal("upstream-refresh-token").unwrap();
        let mut parts: Vec<String> = sealed.split(':').map(str::to_string).collect();
        let mut cipher = STANDARD_NO_PAD.decode(&parts[4]).unwrap();
        cipher[0] ^= 0x01;
        parts[4] = STANDARD_NO_PAD.encode(&cipher);

        assert!(matches!(
            vault.open(&parts.join(":")),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        let vault = vault();
        for stored in [
            "",
            "sealed",
            "sealed:v1:local:short",
            "sealed:v2:local:AAAA:AAAA",
            "plaintext-token",
            "sealed:v1:local:!!!:AAAA",
        ] {
            assert!(matches!(
                vault.open(stored),
                Err(VaultError::InvalidEnvelope)
            ));
        }
    }

    #[test]
    fn envelopes_from_an_unknown_key_are_flagged() {
        let vault = vault();
        let other = TokenVault::new(Box::new(DerivedKeyring::new("master-secret", "other")));
        let sealed = other.seal("upstream-refresh-token").unwrap();
        assert!(matches!(vault.open(&sealed), Err(VaultError::UnknownKey(_))));
    }

    #[test]
    fn digest_is_stable_and_token_specific() {
        let vault = vault();
        assert_eq!(vault.digest("token-a"), vault.digest("token-a"));
        assert_ne!(vault.digest("token-a"), vault.digest("token-b"));
    }
}
