//! Credential vault: symmetric encryption of stored mail passwords.
//!
//! Secrets are sealed with AES-256-GCM under a 32-byte master key. The stored
//! form is URL-safe base64 of `nonce || ciphertext || tag`, so every
//! encryption of the same password yields a different string.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretString};

use crate::error::VaultError;

/// Length of the master key in bytes.
pub const MASTER_KEY_LEN: usize = 32;

/// Encrypts and decrypts mail passwords.
pub struct CredentialVault {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Build a vault from a base64-encoded master key.
    pub fn from_base64(master_key: &str) -> Result<Self, VaultError> {
        let bytes = URL_SAFE
            .decode(master_key.trim())
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Build a vault from raw key bytes.
    pub fn from_bytes(key: &[u8]) -> Result<Self, VaultError> {
        if key.len() != MASTER_KEY_LEN {
            return Err(VaultError::InvalidKey(format!(
                "expected {MASTER_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| VaultError::InvalidKey("rejected by cipher".into()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Generate a fresh master key, returned base64-encoded.
    pub fn generate_key() -> Result<String, VaultError> {
        let mut key = [0u8; MASTER_KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| VaultError::Random)?;
        Ok(URL_SAFE.encode(key))
    }

    /// Encrypt a secret into its storable form.
    pub fn encrypt(&self, secret: &SecretString) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| VaultError::Random)?;

        let mut in_out = secret.expose_secret().as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| VaultError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(URL_SAFE.encode(sealed))
    }

    /// Decrypt a stored secret.
    pub fn decrypt(&self, stored: &str) -> Result<SecretString, VaultError> {
        let mut sealed = URL_SAFE
            .decode(stored.trim())
            .map_err(|e| VaultError::Decrypt(format!("not base64: {e}")))?;
        if sealed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(VaultError::Decrypt("ciphertext too short".into()));
        }

        let mut in_out = sealed.split_off(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&sealed)
            .map_err(|_| VaultError::Decrypt("bad nonce".into()))?;
        let plain = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Decrypt("authentication failed".into()))?;

        let text = String::from_utf8(plain.to_vec())
            .map_err(|_| VaultError::Decrypt("secret is not UTF-8".into()))?;
        Ok(SecretString::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::from_base64(&CredentialVault::generate_key().unwrap()).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = vault();
        let stored = vault.encrypt(&SecretString::from("hunter2-пароль")).unwrap();
        let back = vault.decrypt(&stored).unwrap();
        assert_eq!(back.expose_secret(), "hunter2-пароль");
    }

    #[test]
    fn ciphertext_does_not_contain_plaintext() {
        let vault = vault();
        let stored = vault.encrypt(&SecretString::from("plaintext-password")).unwrap();
        assert!(!stored.contains("plaintext-password"));
    }

    #[test]
    fn same_secret_encrypts_differently() {
        let vault = vault();
        let secret = SecretString::from("same");
        let a = vault.encrypt(&secret).unwrap();
        let b = vault.encrypt(&secret).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let stored = vault().encrypt(&SecretString::from("secret")).unwrap();
        let err = vault().decrypt(&stored).unwrap_err();
        assert!(matches!(err, VaultError::Decrypt(_)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let vault = vault();
        let stored = vault.encrypt(&SecretString::from("secret")).unwrap();
        let mut raw = URL_SAFE.decode(&stored).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(vault.decrypt(&URL_SAFE.encode(raw)).is_err());
    }

    #[test]
    fn short_key_rejected() {
        let err = CredentialVault::from_bytes(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, VaultError::InvalidKey(_)));
    }

    #[test]
    fn garbage_input_rejected() {
        let vault = vault();
        assert!(vault.decrypt("!!!not-base64!!!").is_err());
        assert!(vault.decrypt(&URL_SAFE.encode([1u8, 2, 3])).is_err());
    }

    #[test]
    fn debug_hides_key() {
        let rendered = format!("{:?}", vault());
        assert_eq!(rendered, "CredentialVault { .. }");
    }
}
