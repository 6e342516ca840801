use serde::{Deserialize, Serialize};

/// JWT claims structure that will be encoded/decoded for signed-token callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (caller identity)
    pub sub: String,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
    /// Issuer
    pub iss: Option<String>,
    /// Granted permissions, each `<resource>:<access>` or `*`
    #[serde(default)]
    pub permissions: Vec<String>,
    /// JWT ID (unique identifier for the token)
    pub jti: String,
}
