use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::config::settings::StaticKeyConfig;
use crate::error::{AppError, AuthError};
use crate::models::{CredentialKind, Identity, Permission, PresentedCredential};
use crate::security::api_key_hashing::{constant_time_equal, ApiKeyHasher};
use crate::services::auth::jwt::TokenVerifier;

struct StaticKeyRecord {
    digest: String,
    identity: String,
    permissions: BTreeSet<Permission>,
}

/// Resolves presented credentials into identities.
pub struct CredentialVerifier {
    hasher: ApiKeyHasher,
    static_keys: HashMap<String, StaticKeyRecord>,
    token_verifier: Arc<dyn TokenVerifier>,
}

impl CredentialVerifier {
    pub fn new(
        hasher: ApiKeyHasher,
        static_keys: &[StaticKeyConfig],
        token_verifier: Arc<dyn TokenVerifier>,
    ) -> Result<Self, AppError> {
        let mut records = HashMap::with_capacity(static_keys.len());
        for entry in static_keys {
            if entry.key.is_empty() {
                return Err(AppError::Configuration(format!(
                    "Static API key for identity '{}' is empty",
                    entry.identity
                )));
            }
            let digest = hasher.hash(&entry.key)?;
            let record = StaticKeyRecord {
                digest: digest.clone(),
                identity: entry.identity.clone(),
                permissions: entry.permissions.iter().cloned().collect(),
            };
            if records.insert(digest, record).is_some() {
                return Err(AppError::Configuration(format!(
                    "Static API key for identity '{}' is configured twice",
                    entry.identity
                )));
            }
        }
        debug!("Credential verifier loaded {} static keys", records.len());

        Ok(Self {
            hasher,
            static_keys: records,
            token_verifier,
        })
    }

    /// Resolves `credential` to an identity.
    ///
    /// Without a credential the caller is anonymous, which is only acceptable
    /// for operations that do not require one.
    pub async fn verify(
        &self,
        credential: &PresentedCredential,
        requires_credential: bool,
    ) -> Result<Identity, AuthError> {
        match credential {
            PresentedCredential::None if requires_credential => Err(AuthError::Missing),
            PresentedCredential::None => Ok(Identity::anonymous()),
            PresentedCredential::ApiKey(key) => self.verify_static_key(key),
            PresentedCredential::Bearer(token) => self.verify_token(token).await,
        }
    }

    fn verify_static_key(&self, key: &str) -> Result<Identity, AuthError> {
        let digest = self.hasher.hash(key).map_err(|e| {
            warn!("Failed to hash presented API key: {}", e);
            AuthError::InvalidSignature
        })?;

        match self.static_keys.get(&digest) {
            Some(record) if constant_time_equal(&record.digest, &digest) => {
                debug!("Static API key accepted for identity {}", record.identity);
                Ok(Identity::new(
                    record.identity.clone(),
                    record.permissions.clone(),
                    CredentialKind::StaticKey,
                ))
            }
            _ => {
                warn!("Unknown static API key presented");
                Err(AuthError::InvalidSignature)
            }
        }
    }

    async fn verify_token(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.token_verifier.verify_signature(token).await?;

        let mut permissions = BTreeSet::new();
        for raw in &claims.permissions {
            // A token that verified but carries claims we cannot read is not trustworthy.
            let permission = raw.parse::<Permission>().map_err(|e| {
                warn!("Token for {} carries an invalid permission claim: {}", claims.sub, e);
                AuthError::InvalidSignature
            })?;
            permissions.insert(permission);
        }

        Ok(Identity::new(claims.sub, permissions, CredentialKind::SignedToken))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::jwt::JwtService;
    use chrono::{Duration, Utc};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn verifier() -> (CredentialVerifier, Arc<JwtService>) {
        let jwt = Arc::new(JwtService::new(SECRET, "erp-gateway", 600).unwrap());
        let keys = vec![StaticKeyConfig {
            key: "static-key-1".to_string(),
            identity: "reporting".to_string(),
            permissions: vec![Permission::read("invoices")],
        }];
        let verifier = CredentialVerifier::new(ApiKeyHasher::new("pepper").unwrap(), &keys, jwt.clone()).unwrap();
        (verifier, jwt)
    }

    #[tokio::test]
    async fn test_static_key_resolves_identity() {
        let (verifier, _) = verifier();
        let identity = verifier
            .verify(&PresentedCredential::ApiKey("static-key-1".into()), true)
            .await
            .unwrap();
        assert_eq!(identity.id, "reporting");
        assert_eq!(identity.credential_kind, CredentialKind::StaticKey);
        assert!(identity.has_permission(&Permission::read("invoices")));
        assert!(!identity.has_permission(&Permission::write("invoices")));
    }

    #[tokio::test]
    async fn test_unknown_static_key_is_rejected() {
        let (verifier, _) = verifier();
        let result = verifier
            .verify(&PresentedCredential::ApiKey("static-key-2".into()), true)
            .await;
        assert_eq!(result.unwrap_err(), AuthError::InvalidSignature);
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let (verifier, _) = verifier();
        assert_eq!(
            verifier.verify(&PresentedCredential::None, true).await.unwrap_err(),
            AuthError::Missing
        );
        let anonymous = verifier.verify(&PresentedCredential::None, false).await.unwrap();
        assert!(anonymous.is_anonymous());
    }

    #[tokio::test]
    async fn test_signed_token_resolves_claims() {
        let (verifier, jwt) = verifier();
        let token = jwt.issue("mobile-app", &[Permission::read("customers")]).unwrap();
        let identity = verifier.verify(&PresentedCredential::Bearer(token), true).await.unwrap();
        assert_eq!(identity.id, "mobile-app");
        assert_eq!(identity.credential_kind, CredentialKind::SignedToken);
        assert!(identity.has_permission(&Permission::read("customers")));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (verifier, jwt) = verifier();
        let token = jwt.issue_at("mobile-app", &[], Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(
            verifier.verify(&PresentedCredential::Bearer(token), true).await.unwrap_err(),
            AuthError::Expired
        );
    }

    #[test]
    fn test_duplicate_static_keys_are_rejected() {
        let jwt = Arc::new(JwtService::new(SECRET, "erp-gateway", 600).unwrap());
        let entry = StaticKeyConfig {
            key: "same".to_string(),
            identity: "a".to_string(),
            permissions: vec![],
        };
        let result = CredentialVerifier::new(ApiKeyHasher::new("pepper").unwrap(), &[entry.clone(), entry], jwt);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
