use reqwest::Client;
use std::time::Duration;

/// HTTP client for ERP calls. The overall deadline is enforced per request,
/// so only connection setup is bounded here.
pub fn new_erp_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        // Below common upstream keep-alive limits to avoid reusing stale connections
        .pool_idle_timeout(Some(Duration::from_secs(60)))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
}
