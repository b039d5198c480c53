use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use uuid::Uuid;

const ENVELOPE_PREFIX: &str = "enc:v1:";

/// Symmetric cipher for credentials at rest.
///
/// Stored values are self-describing envelopes:
/// `enc:v1:<nonce_b64>:<ciphertext_b64>` with url-safe unpadded base64.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    /// Key is 32 bytes, url-safe base64 encoded (padded or not).
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();
        let raw = URL_SAFE
            .decode(trimmed)
            .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
            .context("encryption key is not valid base64")?;
        let key: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("encryption key must be 32 bytes, got {}", raw.len()))?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_source = Uuid::new_v4();
        let nonce_raw = &nonce_source.as_bytes()[..12];
        let nonce = Nonce::from_slice(nonce_raw);
        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| anyhow!("failed to initialize credential cipher: {e}"))?;
        let ciphertext = aead
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("failed to encrypt credential: {e}"))?;
        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}",
            URL_SAFE_NO_PAD.encode(nonce_raw),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let rest = stored
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| anyhow!("credential envelope is invalid"))?;
        let (nonce_b64, ciphertext_b64) = rest
            .split_once(':')
            .ok_or_else(|| anyhow!("credential envelope is invalid"))?;

        let nonce_raw = URL_SAFE_NO_PAD
            .decode(nonce_b64)
            .context("failed to decode credential nonce")?;
        if nonce_raw.len() != 12 {
            bail!("credential nonce length is invalid");
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64)
            .context("failed to decode credential payload")?;

        let nonce = Nonce::from_slice(&nonce_raw);
        let aead = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| anyhow!("failed to initialize credential cipher: {e}"))?;
        let plaintext = aead
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| anyhow!("failed to decrypt credential"))?;
        String::from_utf8(plaintext).context("decrypted credential is not valid utf8")
    }
}
