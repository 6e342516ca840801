pub mod erp_client;
pub mod redis_connector;

pub use erp_client::{ErpHttpClient, UpstreamGateway, UpstreamMethod, UpstreamRequest};
pub use redis_connector::RedisConnector;
