pub mod credential_verifier;
pub mod jwt;

pub use credential_verifier::CredentialVerifier;
pub use jwt::{JwtService, TokenVerifier};
