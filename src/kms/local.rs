use std::path::Path;

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, Payload},
};
use anyhow::Context;
use argon2::Argon2;
use zeroize::Zeroizing;

use super::KmsBackend;

const NONCE_LEN: usize = 12;

/// Fixed salt for passphrase derivation. The passphrase is the secret; the
/// salt only has to be stable so every process derives the same key.
const PASSPHRASE_SALT: &[u8; 16] = b"kmscrypt-local-1";

/// Offline backend that wraps keys with AES-256-GCM under a single local
/// key, read from a 32-byte keyfile or derived from a passphrase via
/// Argon2id.
///
/// The KMS key name is bound as associated data, so a ciphertext only
/// decrypts under the name it was produced for.
pub struct LocalKmsBackend {
    cipher: Aes256Gcm,
}

impl LocalKmsBackend {
    pub fn from_keyfile(path: &Path) -> anyhow::Result<Self> {
        let bytes = Zeroizing::new(
            std::fs::read(path).with_context(|| format!("reading keyfile {}", path.display()))?,
        );
        anyhow::ensure!(
            bytes.len() == 32,
            "keyfile must be exactly 32 bytes, got {}",
            bytes.len()
        );
        Self::from_key(&bytes)
    }

    pub fn from_passphrase(passphrase: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(!passphrase.is_empty(), "passphrase must not be empty");
        let mut key = Zeroizing::new([0u8; 32]);
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), PASSPHRASE_SALT, &mut key[..])
            .map_err(|e| anyhow::anyhow!("argon2 failed: {e}"))?;
        Self::from_key(&key[..])
    }

    fn from_key(key: &[u8]) -> anyhow::Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| anyhow::anyhow!("local key must be 32 bytes"))?;
        Ok(Self { cipher })
    }
}

impl KmsBackend for LocalKmsBackend {
    fn encrypt(&self, key_name: &str, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce).map_err(|e| anyhow::anyhow!("getrandom failed: {e}"))?;
        let payload = Payload {
            msg: plaintext,
            aad: key_name.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|e| anyhow::anyhow!("local encrypt failed: {e}"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, key_name: &str, ciphertext: &[u8]) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(
            ciphertext.len() > NONCE_LEN,
            "ciphertext too short: {} bytes",
            ciphertext.len()
        );
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        let payload = Payload {
            msg: body,
            aad: key_name.as_bytes(),
        };
        self.cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| anyhow::anyhow!("local decrypt failed: wrong key or corrupted ciphertext"))
    }
}
