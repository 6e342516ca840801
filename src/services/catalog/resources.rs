use serde_json::{Value, json};

use super::{ArgFormat, ArgSpec, query_text, str_arg};
use crate::clients::UpstreamRequest;
use crate::error::GatewayError;
use crate::models::{Arguments, Permission};
use crate::services::cache::CacheKeys;

pub const URI_SCHEME: &str = "erp://";

// Listing defaults for resource reads
const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 1000;
const MAX_OFFSET: i64 = 1_000_000;

/// One collection summarised inside a composite resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositePart {
    pub resource: &'static str,
    /// Field the part's listing is placed under.
    pub key: &'static str,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceKind {
    /// Items by id under `endpoint/{id}`, listings under `endpoint`.
    Collection { endpoint: &'static str },
    /// One document per `YYYY-MM` period under `endpoint/{period}`.
    Period { endpoint: &'static str },
    /// Assembled by the gateway from listings of other resources.
    Composite { parts: Vec<CompositePart> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub kind: ResourceKind,
    pub args: Vec<ArgSpec>,
}

impl ResourceSpec {
    fn collection(
        name: &'static str,
        title: &'static str,
        description: &'static str,
        filters: &[(&'static str, &'static str)],
    ) -> Self {
        let mut args = vec![
            ArgSpec::string("id", "Identifier of a single item; omit to list"),
            ArgSpec::integer("limit", 1, MAX_LIST_LIMIT, "Number of results").default_value(json!(DEFAULT_LIST_LIMIT)),
            ArgSpec::integer("offset", 0, MAX_OFFSET, "Offset for pagination").default_value(json!(0)),
        ];
        args.extend(filters.iter().map(|(name, description)| ArgSpec::string(name, description)));

        Self {
            name,
            title,
            description,
            kind: ResourceKind::Collection { endpoint: name },
            args,
        }
    }

    /// Read access to this resource and to everything it embeds.
    pub fn required_permissions(&self) -> Vec<Permission> {
        let mut permissions = vec![Permission::read(self.name)];
        if let ResourceKind::Composite { parts } = &self.kind {
            permissions.extend(parts.iter().map(|part| Permission::read(part.resource)));
        }
        permissions
    }

    pub fn embeds(&self, resource: &str) -> bool {
        match &self.kind {
            ResourceKind::Composite { parts } => parts.iter().any(|part| part.resource == resource),
            _ => false,
        }
    }

    /// Fills in listing defaults so equivalent requests share a cache key.
    pub fn normalize(&self, mut args: Arguments) -> Arguments {
        if matches!(self.kind, ResourceKind::Collection { .. }) && !args.contains_key("id") {
            for spec in &self.args {
                if let Some(default) = &spec.default {
                    args.entry(spec.name.to_string()).or_insert_with(|| default.clone());
                }
            }
        }
        args
    }

    pub fn cache_key(&self, keys: &CacheKeys, args: &Arguments) -> String {
        match str_arg(args, "id") {
            Some(id) => {
                let mut params = args.clone();
                params.remove("id");
                keys.item(self.name, id, &params)
            }
            None => keys.list(self.name, args),
        }
    }

    /// The ERP call serving a read of this resource. Composites have none.
    pub fn upstream_request(&self, args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
        match &self.kind {
            ResourceKind::Collection { endpoint } => {
                let mut request = match str_arg(args, "id") {
                    Some(id) => UpstreamRequest::get(format!("{}/{}", endpoint, urlencoding::encode(id))),
                    None => UpstreamRequest::get(*endpoint),
                };
                for (name, value) in args.iter().filter(|(name, _)| name.as_str() != "id") {
                    request = request.with_query(name.clone(), query_text(value));
                }
                Ok(request)
            }
            ResourceKind::Period { endpoint } => {
                let period = str_arg(args, "id").ok_or_else(|| {
                    GatewayError::Internal(format!("Resource '{}' read without a period", self.name))
                })?;
                Ok(UpstreamRequest::get(format!("{}/{}", endpoint, urlencoding::encode(period))))
            }
            ResourceKind::Composite { .. } => Err(GatewayError::Internal(format!(
                "Composite resource '{}' has no single upstream call",
                self.name
            ))),
        }
    }

    /// Listing entries for discovery; collections advertise both shapes.
    pub fn describe(&self) -> Vec<Value> {
        let entry = |uri: String, name: String, description: &str| {
            json!({
                "uri": uri,
                "name": name,
                "description": description,
                "mimeType": "application/json",
            })
        };
        match &self.kind {
            ResourceKind::Collection { .. } => vec![
                entry(
                    format!("{}{}/{{id}}", URI_SCHEME, self.name),
                    self.title.to_string(),
                    self.description,
                ),
                entry(
                    format!("{}{}", URI_SCHEME, self.name),
                    format!("{} List", self.title),
                    &format!("List {}", self.name),
                ),
            ],
            ResourceKind::Period { .. } => vec![entry(
                format!("{}{}/{{period}}", URI_SCHEME, self.name),
                self.title.to_string(),
                self.description,
            )],
            ResourceKind::Composite { .. } => vec![entry(
                format!("{}{}", URI_SCHEME, self.name),
                self.title.to_string(),
                self.description,
            )],
        }
    }
}

/// Splits `erp://<resource>[/<id>][?k=v&...]` into its parts.
pub fn parse_uri(uri: &str) -> Option<(String, Arguments)> {
    let parsed = url::Url::parse(uri).ok()?;
    if parsed.scheme() != URI_SCHEME.trim_end_matches("://") {
        return None;
    }
    let resource = parsed.host_str()?.to_string();
    let mut args: Arguments = parsed
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), Value::String(value.into_owned())))
        .collect();

    let id = parsed.path().trim_matches('/');
    if !id.is_empty() {
        let id = urlencoding::decode(id).ok()?.into_owned();
        args.insert("id".to_string(), Value::String(id));
    }
    Some((resource, args))
}

pub fn erp_resources() -> Vec<ResourceSpec> {
    vec![
        ResourceSpec::collection(
            "invoices",
            "Invoice",
            "Get invoice details by ID",
            &[
                ("status", "Filter by invoice status"),
                ("customer_id", "Filter by customer"),
            ],
        ),
        ResourceSpec::collection(
            "customers",
            "Customer",
            "Get customer details by ID",
            &[("search", "Filter by name or email")],
        ),
        ResourceSpec::collection(
            "products",
            "Product",
            "Get product details by ID",
            &[("category", "Filter by product category")],
        ),
        ResourceSpec::collection(
            "orders",
            "Order",
            "Get order details by ID",
            &[
                ("status", "Filter by order status"),
                ("customer_id", "Filter by customer"),
            ],
        ),
        ResourceSpec {
            name: "financial",
            title: "Financial Summary",
            description: "Get financial summary for period (YYYY-MM)",
            kind: ResourceKind::Period {
                endpoint: "financial/summary",
            },
            args: vec![ArgSpec::string("id", "Period (YYYY-MM)").required().format(ArgFormat::Period)],
        },
        ResourceSpec {
            name: "dashboard",
            title: "Dashboard",
            description: "Get dashboard data with key metrics",
            kind: ResourceKind::Composite {
                parts: vec![
                    CompositePart {
                        resource: "invoices",
                        key: "invoices_summary",
                        limit: 10,
                    },
                    CompositePart {
                        resource: "customers",
                        key: "customers_summary",
                        limit: 10,
                    },
                    CompositePart {
                        resource: "products",
                        key: "products_summary",
                        limit: 10,
                    },
                ],
            },
            args: Vec::new(),
        },
    ]
}
