pub mod auth_jwt_claims;
pub mod envelope;
pub mod identity;

pub use auth_jwt_claims::*;
pub use envelope::*;
pub use identity::*;
