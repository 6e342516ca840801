pub mod auth_handlers;
pub mod health;
pub mod mcp_handlers;
pub mod metrics_handlers;
pub mod rest_handlers;
