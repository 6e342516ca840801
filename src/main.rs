use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use erp_gateway_server::clients::{ErpHttpClient, RedisConnector, UpstreamGateway};
use erp_gateway_server::config::{AppSettings, init_config};
use erp_gateway_server::security::api_key_hashing::ApiKeyHasher;
use erp_gateway_server::services::auth::{CredentialVerifier, JwtService};
use erp_gateway_server::services::cache::{self, CacheLayer, CacheStore, RedisStore};
use erp_gateway_server::services::catalog::OperationRegistry;
use erp_gateway_server::services::metrics::GatewayMetrics;
use erp_gateway_server::services::rate_limiting::{self, RateLimitStorage, RateLimiter};
use erp_gateway_server::services::{Dispatcher, GatewayServices};
use erp_gateway_server::utils::clock::SystemClock;
use erp_gateway_server::{configure_public_routes, configure_routes};

fn exit_on_error<T, E: std::fmt::Display>(result: Result<T, E>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::error!("Failed to initialize {}: {}", what, e);
            log::error!("Cannot start server without a valid {}", what);
            std::process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let app_settings: AppSettings = exit_on_error(init_config(), "configuration");
    log::info!(
        "Starting {} ({} environment)",
        app_settings.app.name,
        app_settings.app.environment
    );

    let registry = Arc::new(exit_on_error(OperationRegistry::erp_catalogue(), "operation catalogue"));

    let jwt = Arc::new(exit_on_error(
        JwtService::new(
            &app_settings.auth.jwt_secret,
            &app_settings.auth.jwt_issuer,
            app_settings.auth.token_duration_secs,
        ),
        "token service",
    ));
    let hasher = exit_on_error(ApiKeyHasher::new(&app_settings.auth.api_key_hash_secret), "API key hasher");
    let verifier = Arc::new(exit_on_error(
        CredentialVerifier::new(hasher, &app_settings.auth.static_keys, jwt.clone()),
        "credential verifier",
    ));

    // One Redis connection serves both the cache and the rate limiter
    let redis = match &app_settings.cache.redis_url {
        Some(url) => {
            let timeout = Duration::from_millis(app_settings.cache.op_timeout_ms);
            let connector = Arc::new(exit_on_error(RedisConnector::new(url, timeout), "Redis client"));
            // Connect up front; failures only mean both users start on local state
            if let Err(e) = connector.connection().await {
                log::warn!("Redis not reachable at startup: {}", e);
            }
            Some(connector)
        }
        None => {
            log::warn!("REDIS_URL not set; cache and rate limits are local to this process");
            None
        }
    };

    let primary: Option<Arc<dyn CacheStore>> = redis
        .as_ref()
        .map(|connector| Arc::new(RedisStore::new(connector.clone())) as Arc<dyn CacheStore>);
    let cache_layer = Arc::new(CacheLayer::new(&app_settings.cache, primary));

    let storage = match &redis {
        Some(connector) => RateLimitStorage::new_redis(
            connector.clone(),
            Duration::from_secs(app_settings.rate_limit.retry_cooldown_secs),
        ),
        None => RateLimitStorage::new_memory(),
    };
    let rate_limiter = Arc::new(RateLimiter::new(&app_settings.rate_limit, storage.clone()));

    let upstream: Arc<dyn UpstreamGateway> = Arc::new(exit_on_error(ErpHttpClient::new(&app_settings.erp), "ERP client"));
    // The gateway starts regardless; reads fail per request until the ERP answers
    match upstream.health_check().await {
        Ok(_) => log::info!("ERP reachable at {}", app_settings.erp.base_url),
        Err(e) => log::warn!("ERP health check failed: {}", e),
    }

    let services = GatewayServices {
        registry,
        verifier,
        rate_limiter,
        cache: cache_layer.clone(),
        upstream,
        metrics: Arc::new(exit_on_error(GatewayMetrics::new(), "metrics registry")),
        clock: Arc::new(SystemClock),
    };
    let dispatcher = web::Data::new(Dispatcher::new(
        services,
        app_settings.app.name.clone(),
        app_settings.validation.max_argument_length,
    ));
    let jwt_data = web::Data::from(jwt);

    // Background maintenance of in-process state
    tokio::spawn(rate_limiting::start_memory_store_cleanup_task(
        storage,
        app_settings.rate_limit.cleanup_interval_secs,
    ));
    tokio::spawn(cache::start_fallback_sweep_task(
        cache_layer,
        app_settings.cache.sweep_interval_secs,
    ));

    let host = &app_settings.server.host;
    let port = app_settings.server.port;
    log::info!("Starting server at http://{}:{}", host, port);
    let listener = TcpListener::bind(format!("{}:{}", host, port))?;

    HttpServer::new(move || {
        let mut cors = Cors::default();
        if app_settings.server.cors_origins.contains(&"*".to_string()) {
            cors = cors.allow_any_origin();
        } else {
            for origin in &app_settings.server.cors_origins {
                cors = cors.allowed_origin(origin);
            }
        }
        cors = cors.allow_any_method().allow_any_header();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(dispatcher.clone())
            .app_data(jwt_data.clone())
            .configure(configure_public_routes)
            .configure(configure_routes)
    })
    .listen(listener)?
    .run()
    .await
}
