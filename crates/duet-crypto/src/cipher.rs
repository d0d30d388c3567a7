use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Symmetric cipher for message content at rest.
///
/// Stored representation is `hex(iv) ":" hex(ciphertext)` with a fresh
/// random 96-bit IV per encryption.
pub struct MessageCipher {
    key: [u8; 32],
}

impl MessageCipher {
    /// Derive the single shared key from the configured secret.
    ///
    /// This constructor is the only place key derivation happens; swapping
    /// in per-conversation keys later means changing this seam, not the
    /// call sites.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut iv = [0u8; 12];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("encryption failed: {}", e))?;

        Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
    }

    /// Decrypt a stored value, returning it unchanged when it cannot be
    /// decrypted.
    ///
    /// Reads must survive rows written before encryption was enabled or
    /// with a rotated key, so any parse or decrypt failure degrades to the
    /// raw stored value. Each fallback is logged — a burst of these means
    /// a key problem, not normal traffic.
    pub fn decrypt_lenient(&self, stored: &str) -> String {
        match self.try_decrypt(stored) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("returning stored value undecrypted: {}", e);
                stored.to_string()
            }
        }
    }

    fn try_decrypt(&self, stored: &str) -> Result<String> {
        let (iv_hex, ct_hex) = stored
            .split_once(':')
            .ok_or_else(|| anyhow!("not in iv:ciphertext form"))?;

        let iv = hex::decode(iv_hex)?;
        if iv.len() != 12 {
            return Err(anyhow!("bad IV length: {}", iv.len()));
        }
        let ciphertext = hex::decode(ct_hex)?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .map_err(|e| anyhow!("decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext)?)
    }
}
