use futures_util::future::try_join_all;
use log::{debug, info, warn};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clients::{UpstreamGateway, UpstreamRequest};
use crate::error::{AuthError, GatewayError, UpstreamError};
use crate::models::{
    Arguments, CacheProvenance, Identity, InboundRequest, OperationClass, PresentedCredential, ResponseEnvelope,
};
use crate::services::auth::CredentialVerifier;
use crate::services::cache::{CacheLayer, GlobPattern};
use crate::services::catalog::prompts::PromptContext;
use crate::services::catalog::resources::{ResourceKind, ResourceSpec};
use crate::services::catalog::tools::ToolSpec;
use crate::services::catalog::{Operation, OperationRegistry, PromptSpec, input_schema};
use crate::services::metrics::GatewayMetrics;
use crate::services::rate_limiting::RateLimiter;
use crate::services::validation::validate_arguments;
use crate::utils::clock::Clock;
use crate::utils::sanitize::sanitize_arguments;

pub const PROTOCOL_VERSION: &str = "1.0";

/// Shared services the dispatcher drives.
#[derive(Clone)]
pub struct GatewayServices {
    pub registry: Arc<OperationRegistry>,
    pub verifier: Arc<CredentialVerifier>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<CacheLayer>,
    pub upstream: Arc<dyn UpstreamGateway>,
    pub metrics: Arc<GatewayMetrics>,
    pub clock: Arc<dyn Clock>,
}

/// Successful result of one dispatched operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub payload: Value,
    pub cache: CacheProvenance,
}

/// Runs every inbound operation through the fixed pipeline:
/// authenticate, authorize, rate check, validate, then serve from cache or
/// the ERP. A failing stage ends the request and no later stage runs.
pub struct Dispatcher {
    services: GatewayServices,
    invalidations: HashMap<&'static str, Vec<GlobPattern>>,
    server_name: String,
    max_argument_length: usize,
    upstream_timeout: Duration,
}

impl Dispatcher {
    pub fn new(services: GatewayServices, server_name: impl Into<String>, max_argument_length: usize) -> Self {
        let invalidations = services.registry.invalidation_plan(services.cache.keys());
        let upstream_timeout = services.upstream.default_timeout();
        debug!(
            "Dispatcher ready: {} mutating tools with invalidation plans, upstream deadline {}ms",
            invalidations.len(),
            upstream_timeout.as_millis()
        );
        Self {
            services,
            invalidations,
            server_name: server_name.into(),
            max_argument_length,
            upstream_timeout,
        }
    }

    pub fn services(&self) -> &GatewayServices {
        &self.services
    }

    pub fn invalidation_patterns(&self, tool: &str) -> &[GlobPattern] {
        self.invalidations.get(tool).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Dispatches `request` and wraps the outcome in a response envelope.
    pub async fn dispatch(&self, request: InboundRequest) -> ResponseEnvelope {
        match self.execute(request).await {
            Ok(done) => ResponseEnvelope::ok(done.payload, done.cache),
            Err(e) => ResponseEnvelope::failed(&e),
        }
    }

    /// Dispatches `request`, keeping the typed error for transports that map it.
    pub async fn execute(&self, request: InboundRequest) -> Result<Dispatched, GatewayError> {
        let started = Instant::now();
        let label = match self.services.registry.lookup(request.class, &request.name) {
            Some(_) => format!("{}:{}", request.class, request.name),
            None => format!("{}:unknown", request.class),
        };

        let result = self.run(request).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.services.metrics.record_request(&label, outcome, started.elapsed());
        match &result {
            Ok(done) => debug!("{} completed (cache {:?})", label, done.cache),
            Err(e) => info!("{} failed: {}", label, e),
        }
        result
    }

    async fn run(&self, request: InboundRequest) -> Result<Dispatched, GatewayError> {
        let InboundRequest {
            class,
            name,
            arguments,
            credential,
        } = request;

        let identity = self.authenticate(&credential).await?;

        let operation = self
            .services
            .registry
            .lookup(class, &name)
            .ok_or_else(|| GatewayError::UnknownOperation {
                class: class.to_string(),
                name: name.clone(),
            })?;
        self.authorize(&identity, &operation)?;

        self.admit(&identity).await?;

        let arguments = validate_arguments(operation.args(), arguments, self.max_argument_length)?;
        let arguments = sanitize_arguments(arguments);

        match operation {
            Operation::Resource(spec) => self.read_resource(spec, arguments).await,
            Operation::Tool(spec) => self.call_tool(spec, arguments).await,
            Operation::Prompt(spec) => self.render_prompt(spec, arguments).await,
        }
    }

    /// Resolves the presented credential. Every operation requires one.
    pub async fn authenticate(&self, credential: &PresentedCredential) -> Result<Identity, GatewayError> {
        Ok(self.services.verifier.verify(credential, true).await?)
    }

    fn authorize(&self, identity: &Identity, operation: &Operation<'_>) -> Result<(), GatewayError> {
        let missing = operation
            .required_permissions(&self.services.registry)
            .into_iter()
            .find(|permission| !identity.has_permission(permission));
        match missing {
            Some(permission) => {
                warn!(
                    "Identity {} lacks {} for {} {}",
                    identity.id,
                    permission,
                    operation.class(),
                    operation.name()
                );
                Err(AuthError::Forbidden {
                    permission: permission.to_string(),
                }
                .into())
            }
            None => Ok(()),
        }
    }

    /// Counts one request against `identity`'s quota.
    pub async fn admit(&self, identity: &Identity) -> Result<(), GatewayError> {
        if identity.is_anonymous() {
            return Ok(());
        }
        let now = self.services.clock.now();
        match self.services.rate_limiter.admit(identity, now).await {
            Ok(admitted) => {
                debug!("Identity {} admitted ({} remaining)", identity.id, admitted.remaining);
                Ok(())
            }
            Err(e) => {
                self.services.metrics.record_rate_limited();
                Err(e.into())
            }
        }
    }

    async fn read_resource(&self, spec: &ResourceSpec, args: Arguments) -> Result<Dispatched, GatewayError> {
        match &spec.kind {
            ResourceKind::Composite { parts } => {
                let key = spec.cache_key(self.services.cache.keys(), &args);
                if let Some(cached) = self.cache_lookup(&key).await {
                    return Ok(Dispatched {
                        payload: cached,
                        cache: CacheProvenance::Hit,
                    });
                }

                let generation = self.services.cache.generation();
                let fetches = parts.iter().map(|part| async move {
                    let part_spec = self.services.registry.resource(part.resource).ok_or_else(|| {
                        GatewayError::Internal(format!("Composite part '{}' is not in the catalogue", part.resource))
                    })?;
                    let part_args = Arguments::from([("limit".to_string(), json!(part.limit))]);
                    let fetched = self.read_single(part_spec, part_args).await?;
                    Ok::<_, GatewayError>((part.key, fetched.payload))
                });
                let mut assembled: Map<String, Value> = try_join_all(fetches)
                    .await?
                    .into_iter()
                    .map(|(key, payload)| (key.to_string(), payload))
                    .collect();
                assembled.insert("timestamp".to_string(), json!(self.services.clock.now().to_rfc3339()));
                let payload = json!({ spec.name: Value::Object(assembled) });

                self.cache_store(&key, &payload, self.services.cache.ttl_for(spec.name), generation)
                    .await;
                Ok(Dispatched {
                    payload,
                    cache: CacheProvenance::Miss,
                })
            }
            _ => self.read_single(spec, args).await,
        }
    }

    /// Cache-aside read of a collection or period resource.
    async fn read_single(&self, spec: &ResourceSpec, args: Arguments) -> Result<Dispatched, GatewayError> {
        let args = spec.normalize(args);
        let key = spec.cache_key(self.services.cache.keys(), &args);

        if let Some(cached) = self.cache_lookup(&key).await {
            return Ok(Dispatched {
                payload: cached,
                cache: CacheProvenance::Hit,
            });
        }

        let generation = self.services.cache.generation();
        let request = spec.upstream_request(&args)?;
        let payload = self.call_upstream(&request).await?;

        self.cache_store(&key, &payload, self.services.cache.ttl_for(spec.name), generation)
            .await;
        Ok(Dispatched {
            payload,
            cache: CacheProvenance::Miss,
        })
    }

    async fn call_tool(&self, spec: &ToolSpec, args: Arguments) -> Result<Dispatched, GatewayError> {
        let request = spec.upstream_request(&args)?;
        let result = self.call_upstream(&request).await?;

        for pattern in self.invalidation_patterns(spec.name) {
            match self.services.cache.invalidate(pattern).await {
                Ok(removed) => debug!("{} invalidated {} entries matching {}", spec.name, removed, pattern),
                Err(e) => warn!("Invalidation of {} after {} failed: {}", pattern, spec.name, e),
            }
        }

        Ok(Dispatched {
            payload: json!({
                "success": true,
                "tool": spec.name,
                "result": result,
                "timestamp": self.services.clock.now().to_rfc3339(),
            }),
            cache: CacheProvenance::Miss,
        })
    }

    async fn render_prompt(&self, spec: &PromptSpec, args: Arguments) -> Result<Dispatched, GatewayError> {
        let fetches = spec.supporting_reads(&args).into_iter().map(|read| async move {
            let resource = self.services.registry.resource(read.resource).ok_or_else(|| {
                GatewayError::Internal(format!("Prompt '{}' reads unknown resource '{}'", spec.name, read.resource))
            })?;
            let read_args = validate_arguments(&resource.args, read.args, self.max_argument_length)?;
            let fetched = self.read_resource(resource, read_args).await?;
            Ok::<_, GatewayError>((read.key, fetched.payload))
        });
        let data: Map<String, Value> = try_join_all(fetches)
            .await?
            .into_iter()
            .map(|(key, payload)| (key.to_string(), payload))
            .collect();

        let context = PromptContext {
            data: &data,
            now: self.services.clock.now(),
        };
        let messages = spec.render(&args, &context);
        Ok(Dispatched {
            payload: json!({ "messages": messages }),
            cache: CacheProvenance::Miss,
        })
    }

    /// Calls the ERP under a hard deadline.
    async fn call_upstream(&self, request: &UpstreamRequest) -> Result<Value, GatewayError> {
        self.services.metrics.record_upstream_call();
        let call = self.services.upstream.call(request, self.upstream_timeout);
        match tokio::time::timeout(self.upstream_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(
                    "ERP call {} exceeded {}ms deadline",
                    request,
                    self.upstream_timeout.as_millis()
                );
                Err(UpstreamError::Timeout.into())
            }
        }
    }

    async fn cache_lookup(&self, key: &str) -> Option<Value> {
        let found = match self.services.cache.get(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Cache lookup for {} failed, treating as miss: {}", key, e);
                None
            }
        };
        self.services.metrics.record_cache_lookup(found.is_some());
        found
    }

    async fn cache_store(&self, key: &str, payload: &Value, ttl: Duration, generation: u64) {
        if let Err(e) = self
            .services
            .cache
            .set_unless_invalidated(key, payload, ttl, generation)
            .await
        {
            warn!("Could not cache {}: {}", key, e);
        }
    }

    /// Protocol handshake; open to unauthenticated callers.
    pub fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "resources": { "subscribe": false, "listChanged": false },
                "tools": { "listChanged": false },
                "prompts": { "listChanged": false },
            },
            "serverInfo": {
                "name": self.server_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    /// Lists the operations of `class` that the caller may invoke.
    pub async fn list(&self, class: OperationClass, credential: &PresentedCredential) -> Result<Value, GatewayError> {
        let identity = self.authenticate(credential).await?;
        self.admit(&identity).await?;

        let key = match class {
            OperationClass::Resource => "resources",
            OperationClass::Tool => "tools",
            OperationClass::Prompt => "prompts",
        };
        Ok(json!({ key: self.visible_to(&identity, class) }))
    }

    /// Server information and every listing the caller may see, counted as
    /// a single request against the caller's quota.
    pub async fn capabilities(&self, credential: &PresentedCredential) -> Result<Value, GatewayError> {
        let identity = self.authenticate(credential).await?;
        self.admit(&identity).await?;

        Ok(json!({
            "server": self.initialize(),
            "resources": self.visible_to(&identity, OperationClass::Resource),
            "tools": self.visible_to(&identity, OperationClass::Tool),
            "prompts": self.visible_to(&identity, OperationClass::Prompt),
        }))
    }

    fn visible_to(&self, identity: &Identity, class: OperationClass) -> Vec<Value> {
        let registry = &self.services.registry;
        let allowed = |operation: Operation<'_>| {
            operation
                .required_permissions(registry)
                .iter()
                .all(|permission| identity.has_permission(permission))
        };

        match class {
            OperationClass::Resource => registry
                .resources()
                .filter(|spec| allowed(Operation::Resource(spec)))
                .flat_map(ResourceSpec::describe)
                .collect(),
            OperationClass::Tool => registry
                .tools()
                .filter(|spec| allowed(Operation::Tool(spec)))
                .map(|spec| {
                    json!({
                        "name": spec.name,
                        "description": spec.description,
                        "inputSchema": input_schema(&spec.args),
                    })
                })
                .collect(),
            OperationClass::Prompt => registry
                .prompts()
                .filter(|spec| allowed(Operation::Prompt(spec)))
                .map(PromptSpec::describe)
                .collect(),
        }
    }
}
