use crate::error::AppError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Digests static API keys so the allow-list never holds raw key material.
#[derive(Clone)]
pub struct ApiKeyHasher {
    secret: Vec<u8>,
}

impl ApiKeyHasher {
    pub fn new(secret: &str) -> Result<Self, AppError> {
        if secret.is_empty() {
            return Err(AppError::Configuration("API key hashing secret must not be empty".to_string()));
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
        })
    }

    /// Hashes an API key using HMAC-SHA256 with the configured secret
    ///
    /// # Returns
    /// * `Result<String, AppError>` - Hex-encoded hash or error
    pub fn hash(&self, raw_key: &str) -> Result<String, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("Failed to create HMAC: {}", e)))?;

        mac.update(raw_key.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Compares two strings in constant time to prevent timing attacks
pub fn constant_time_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
