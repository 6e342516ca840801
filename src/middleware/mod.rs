pub mod credential;

pub use credential::extract_credential;
