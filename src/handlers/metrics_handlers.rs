use actix_web::{HttpResponse, web};

use crate::error::AppError;
use crate::services::Dispatcher;

/// Prometheus text exposition of request, rate-limit and cache metrics.
pub async fn get_metrics(dispatcher: web::Data<Dispatcher>) -> Result<HttpResponse, AppError> {
    let services = dispatcher.services();
    let stats = services.cache.stats().await;
    let body = services
        .metrics
        .render(&stats)
        .map_err(|e| AppError::Internal(format!("Failed to encode metrics: {}", e)))?;
    Ok(HttpResponse::Ok().content_type(prometheus::TEXT_FORMAT).body(body))
}
