use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::services::Dispatcher;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    backend: String,
    reachable: bool,
    degraded: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    version: String,
    timestamp: String,
    cache: CacheHealth,
}

/// Liveness plus cache backend state. Bypasses authentication and rate limiting.
pub async fn health_check(dispatcher: web::Data<Dispatcher>) -> impl Responder {
    let cache = &dispatcher.services().cache;
    let reachable = cache.ping().await.is_ok();
    let stats = cache.stats().await;

    // A degraded cache still serves requests from the in-process store
    let status = if stats.degraded || !reachable { "degraded" } else { "healthy" };
    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        cache: CacheHealth {
            backend: stats.backend.to_string(),
            reachable,
            degraded: stats.degraded,
        },
    };

    HttpResponse::Ok().json(response)
}
