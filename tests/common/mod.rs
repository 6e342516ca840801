#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use erp_gateway_server::clients::{UpstreamGateway, UpstreamMethod, UpstreamRequest};
use erp_gateway_server::config::settings::{CacheConfig, RateLimitConfig, StaticKeyConfig};
use erp_gateway_server::error::UpstreamError;
use erp_gateway_server::models::{Arguments, InboundRequest, OperationClass, Permission, PresentedCredential};
use erp_gateway_server::security::api_key_hashing::ApiKeyHasher;
use erp_gateway_server::services::auth::{CredentialVerifier, JwtService};
use erp_gateway_server::services::cache::{CacheLayer, CacheStore, GlobPattern, StoreError};
use erp_gateway_server::services::catalog::OperationRegistry;
use erp_gateway_server::services::metrics::GatewayMetrics;
use erp_gateway_server::services::rate_limiting::{RateLimitStorage, RateLimiter};
use erp_gateway_server::services::{Dispatcher, GatewayServices};
use erp_gateway_server::utils::clock::Clock;

pub const JWT_SECRET: &str = "test-secret-with-at-least-32-chars!!";
pub const ISSUER: &str = "erp-gateway";
pub const ADMIN_KEY: &str = "admin-static-key-000000000001";
pub const READER_KEY: &str = "reader-static-key-00000000002";

/// Small in-memory ERP answering the invoice endpoints.
pub struct FakeErp {
    invoices: Mutex<Vec<Value>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeErp {
    pub fn new() -> Self {
        Self {
            invoices: Mutex::new(vec![
                json!({"id": "INV-001", "customer_id": "C-1", "amount": 120.0, "status": "paid"}),
                json!({"id": "INV-002", "customer_id": "C-2", "amount": 75.5, "status": "draft"}),
            ]),
            calls: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every later call sleeps for `delay` before answering.
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    fn answer(&self, request: &UpstreamRequest) -> Result<Value, UpstreamError> {
        let segments: Vec<&str> = request.path.split('/').collect();
        match (request.method, segments.as_slice()) {
            (UpstreamMethod::Get, ["invoices"]) => Ok(json!({ "invoices": *self.invoices.lock() })),
            (UpstreamMethod::Get, ["invoices", id]) => self
                .invoices
                .lock()
                .iter()
                .find(|invoice| invoice["id"] == *id)
                .cloned()
                .ok_or(UpstreamError::Rejected {
                    status: 404,
                    message: format!("invoice {} not found", id),
                }),
            (UpstreamMethod::Post, ["invoices"]) => {
                let mut invoices = self.invoices.lock();
                let mut created = request.body.clone().unwrap_or_else(|| json!({}));
                created["id"] = json!(format!("INV-{:03}", invoices.len() + 1));
                invoices.push(created.clone());
                Ok(created)
            }
            (UpstreamMethod::Get, ["financial", "summary", period]) => {
                Ok(json!({ "period": period, "revenue": 1000, "expenses": 400 }))
            }
            (UpstreamMethod::Get, [collection]) => Ok(json!({ *collection: [] })),
            _ => Err(UpstreamError::Rejected {
                status: 404,
                message: format!("no route for {}", request),
            }),
        }
    }
}

#[async_trait]
impl UpstreamGateway for FakeErp {
    async fn call(&self, request: &UpstreamRequest, _timeout: Duration) -> Result<Value, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.answer(request)
    }

    async fn health_check(&self) -> Result<Value, UpstreamError> {
        Ok(json!({ "status": "ok" }))
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(2)
    }
}

/// Cache backend that is never reachable.
pub struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    fn name(&self) -> &'static str {
        "redis"
    }
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn invalidate(&self, _pattern: &GlobPattern) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn entry_count(&self) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts ten seconds into a minute.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 10).unwrap()),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub erp: Arc<FakeErp>,
    pub clock: Arc<ManualClock>,
    pub cache: Arc<CacheLayer>,
    pub jwt: Arc<JwtService>,
}

pub struct HarnessBuilder {
    per_minute: u64,
    primary: Option<Arc<dyn CacheStore>>,
    fallback_capacity: Option<usize>,
}

impl HarnessBuilder {
    pub fn per_minute(mut self, per_minute: u64) -> Self {
        self.per_minute = per_minute;
        self
    }

    pub fn primary_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.primary = Some(store);
        self
    }

    pub fn fallback_capacity(mut self, capacity: usize) -> Self {
        self.fallback_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Harness {
        let jwt = Arc::new(JwtService::new(JWT_SECRET, ISSUER, 3600).unwrap());
        let keys = vec![
            StaticKeyConfig {
                key: ADMIN_KEY.into(),
                identity: "admin".into(),
                permissions: vec![Permission::all()],
            },
            StaticKeyConfig {
                key: READER_KEY.into(),
                identity: "reader".into(),
                permissions: vec![Permission::read("invoices"), Permission::read("customers")],
            },
        ];
        let verifier = CredentialVerifier::new(ApiKeyHasher::new("pepper").unwrap(), &keys, jwt.clone()).unwrap();

        let limits = RateLimitConfig {
            per_minute: self.per_minute,
            per_hour: 0,
            ..RateLimitConfig::default()
        };
        let mut cache_config = CacheConfig::default();
        if let Some(capacity) = self.fallback_capacity {
            cache_config.fallback_capacity = capacity;
        }
        let cache = Arc::new(CacheLayer::new(&cache_config, self.primary));
        let erp = Arc::new(FakeErp::new());
        let clock = Arc::new(ManualClock::new());

        let services = GatewayServices {
            registry: Arc::new(OperationRegistry::erp_catalogue().unwrap()),
            verifier: Arc::new(verifier),
            rate_limiter: Arc::new(RateLimiter::new(&limits, RateLimitStorage::new_memory())),
            cache: cache.clone(),
            upstream: erp.clone(),
            metrics: Arc::new(GatewayMetrics::new().unwrap()),
            clock: clock.clone(),
        };

        Harness {
            dispatcher: Dispatcher::new(services, "erp-gateway", 1024),
            erp,
            clock,
            cache,
            jwt,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            per_minute: 0,
            primary: None,
            fallback_capacity: None,
        }
    }
}

pub fn api_key(key: &str) -> PresentedCredential {
    PresentedCredential::ApiKey(key.to_string())
}

pub fn request(class: OperationClass, name: &str, args: Value, credential: PresentedCredential) -> InboundRequest {
    let arguments: Arguments = match args {
        Value::Object(map) => map.into_iter().collect(),
        _ => Arguments::new(),
    };
    InboundRequest::new(class, name, arguments, credential)
}
