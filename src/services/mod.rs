pub mod auth;
pub mod cache;
pub mod catalog;
pub mod dispatcher;
pub mod metrics;
pub mod rate_limiting;
pub mod validation;

pub use dispatcher::{Dispatched, Dispatcher, GatewayServices};
