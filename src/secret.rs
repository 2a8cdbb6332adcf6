use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

use crate::error::ProvisionError;

pub const DEFAULT_SECRET_BYTES: usize = 32;
pub const MIN_SECRET_BYTES: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Password,
    SshKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    Generated,
    Downloaded(String),
}

/// A secret value. The value never appears in `Debug` output or error
/// messages, and the buffer is zeroized when the secret is dropped.
#[derive(Clone)]
pub struct Secret {
    kind: SecretKind,
    source: SecretSource,
    value: String,
}

impl Secret {
    /// Generates a random password from `byte_strength` bytes of OS
    /// randomness, encoded as URL-safe base64.
    ///
    /// # Errors
    /// Returns `Validation` when `byte_strength` is below the minimum, and an
    /// error when the system random source fails.
    pub fn generate_password(byte_strength: usize) -> Result<Self, ProvisionError> {
        if byte_strength < MIN_SECRET_BYTES {
            return Err(ProvisionError::validation(format!(
                "password strength {byte_strength} is below the minimum of {MIN_SECRET_BYTES} bytes"
            )));
        }
        let mut buffer = vec![0u8; byte_strength];
        let rng = SystemRandom::new();
        rng.fill(&mut buffer)
            .map_err(|_| ProvisionError::validation("system random source failed"))?;
        let value = URL_SAFE_NO_PAD.encode(&buffer);
        buffer.zeroize();
        Ok(Secret {
            kind: SecretKind::Password,
            source: SecretSource::Generated,
            value,
        })
    }

    #[must_use]
    pub fn downloaded_key(url: impl Into<String>, value: String) -> Self {
        Secret {
            kind: SecretKind::SshKey,
            source: SecretSource::Downloaded(url.into()),
            value,
        }
    }

    #[must_use]
    pub fn provided_password(value: String) -> Self {
        Secret {
            kind: SecretKind::Password,
            source: SecretSource::Generated,
            value,
        }
    }

    #[must_use]
    pub fn kind(&self) -> SecretKind {
        self.kind
    }

    #[must_use]
    pub fn source(&self) -> &SecretSource {
        &self.source
    }

    /// The raw value. Callers must not log or embed it in error messages.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn masked(&self) -> String {
        mask_value(&self.value)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("kind", &self.kind)
            .field("value", &self.masked())
            .finish_non_exhaustive()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

#[must_use]
pub fn mask_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", &trimmed[trimmed.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;

    #[test]
    fn test_generate_password_encodes_requested_bytes() {
        let secret = Secret::generate_password(32).unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(secret.expose()).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_generate_password_rejects_weak_strength() {
        let err = Secret::generate_password(16).unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn test_generated_passwords_do_not_repeat() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let secret = Secret::generate_password(32).unwrap();
            assert!(seen.insert(secret.expose().to_string()));
        }
    }

    #[test]
    fn test_debug_output_masks_value() {
        let secret = Secret::provided_password("supersecretvalue".to_string());
        let debug = format!("{secret:?}");
        assert!(!debug.contains("supersecretvalue"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_mask_value_short_and_long() {
        assert_eq!(mask_value("abc"), "****");
        assert_eq!(mask_value("secretvalue"), "****alue");
    }
}
