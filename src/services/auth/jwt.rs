use crate::error::{AppError, AuthError};
use crate::models::auth_jwt_claims::Claims;
use crate::models::Permission;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::{debug, error, info, trace, warn};
use uuid::Uuid;

// Default token lifetime in seconds
pub const DEFAULT_TOKEN_DURATION_SECS: i64 = 3600;

// Shortest secret accepted for HS256 signing
pub const MIN_SECRET_LEN: usize = 32;

// Allowed clock skew when checking `exp`
const LEEWAY_SECS: u64 = 5;

/// Verifies self-contained signed tokens.
///
/// The HS256 implementation below is local, but an external issuer can stand
/// behind this seam, which is why verification may suspend.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify_signature(&self, token: &str) -> Result<Claims, AuthError>;
}

/// Issues and verifies HS256 tokens for gateway callers.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    token_duration_secs: i64,
}

impl JwtService {
    pub fn new(secret: &str, issuer: &str, token_duration_secs: i64) -> Result<Self, AppError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AppError::Configuration(format!(
                "JWT secret must be at least {} characters long",
                MIN_SECRET_LEN
            )));
        }
        info!("Initializing JWT keys for issuer {}", issuer);
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            token_duration_secs: if token_duration_secs > 0 {
                token_duration_secs
            } else {
                DEFAULT_TOKEN_DURATION_SECS
            },
        })
    }

    pub fn token_duration_secs(&self) -> i64 {
        self.token_duration_secs
    }

    /// Generate a token for `subject` carrying `permissions`, valid from now
    pub fn issue(&self, subject: &str, permissions: &[Permission]) -> Result<String, AppError> {
        self.issue_at(subject, permissions, Utc::now())
    }

    /// Generate a token as if issued at `issued_at`
    pub fn issue_at(
        &self,
        subject: &str,
        permissions: &[Permission],
        issued_at: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let exp = issued_at
            .checked_add_signed(Duration::seconds(self.token_duration_secs))
            .ok_or_else(|| AppError::Internal("Failed to calculate JWT expiration time".to_string()))?;

        let claims = Claims {
            sub: subject.to_string(),
            exp: exp.timestamp().max(0) as usize,
            iat: issued_at.timestamp().max(0) as usize,
            iss: Some(self.issuer.clone()),
            permissions: permissions.iter().map(ToString::to_string).collect(),
            jti: Uuid::new_v4().to_string(),
        };

        debug!("Generating JWT token for {} (exp: {})", subject, exp);
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            error!("Failed to generate JWT token: {}", e);
            AppError::Internal(format!("Token generation failed: {}", e))
        })
    }

    /// Verify a token and extract the claims
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        trace!("Verifying JWT token");

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]); // Trust only our issuer
        validation.leeway = LEEWAY_SECS;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|err| {
            match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    debug!("JWT rejected: token has expired");
                    AuthError::Expired
                }
                other => {
                    warn!("JWT validation failed: {:?}", other);
                    AuthError::InvalidSignature
                }
            }
        })?;

        debug!("JWT token verified successfully for {}", token_data.claims.sub);
        Ok(token_data.claims)
    }
}

#[async_trait]
impl TokenVerifier for JwtService {
    async fn verify_signature(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_token(token)
    }
}
