// SPDX-License-Identifier: MIT OR Apache-2.0
//! At-rest encryption for episode payloads.
//!
//! AES-256-GCM with a random 96-bit nonce prepended to the ciphertext.
//! The key comes from a named environment variable (64 hex chars) and is
//! read once at store construction.

use anyhow::{Context, Result, bail};
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, NONCE_LEN, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};

/// Sealing/opening wrapper around one AES-256-GCM key.
pub struct Cipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl Cipher {
    /// Build a cipher from 32 raw key bytes.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| anyhow::anyhow!("invalid AES-256 key length: {}", key.len()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Build a cipher from the named environment variable (hex-encoded
    /// 32-byte key).
    pub fn from_env(var: &str) -> Result<Self> {
        let hex = std::env::var(var)
            .with_context(|| format!("read encryption key from ${var}"))?;
        let key = decode_hex(hex.trim())
            .with_context(|| format!("${var} must be 64 hex characters"))?;
        Self::from_key_bytes(&key)
    }

    /// Encrypt `plaintext`; output is `nonce || ciphertext+tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("nonce generation failed"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut buffer = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| anyhow::anyhow!("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + buffer.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&buffer);
        Ok(out)
    }

    /// Decrypt a payload produced by [`Cipher::seal`].
    pub fn open(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < NONCE_LEN {
            bail!("payload shorter than nonce");
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| anyhow::anyhow!("bad nonce"))?;
        let mut buffer = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| anyhow::anyhow!("decryption failed (wrong key or corrupt payload)"))?;
        Ok(plaintext.to_vec())
    }
}

fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() != 64 || hex.len() % 2 != 0 {
        bail!("expected 64 hex characters, got {}", hex.len());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).context("invalid hex"))
        .collect()
}
