use serde_json::{Value, json};

use super::{ArgFormat, ArgSpec, query_text, str_arg};
use crate::clients::UpstreamRequest;
use crate::error::GatewayError;
use crate::models::{Arguments, Permission};

const DEFAULT_TOOL_LIMIT: i64 = 100;
const DEFAULT_SEARCH_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 1000;
const MAX_OFFSET: i64 = 1_000_000;
const MAX_BATCH: usize = 100;

pub type BuildRequest = fn(&Arguments) -> Result<UpstreamRequest, GatewayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectScope {
    /// New entries appear in listings; existing items are untouched.
    Listings,
    /// Items and listings may both change.
    Everything,
}

/// A resource whose cached entries a tool can make stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    pub resource: &'static str,
    pub scope: EffectScope,
}

impl Effect {
    pub fn listings(resource: &'static str) -> Self {
        Self {
            resource,
            scope: EffectScope::Listings,
        }
    }

    pub fn everything(resource: &'static str) -> Self {
        Self {
            resource,
            scope: EffectScope::Everything,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: Vec<ArgSpec>,
    pub permission: Permission,
    pub mutating: bool,
    pub effects: Vec<Effect>,
    pub build: BuildRequest,
}

impl ToolSpec {
    fn read(name: &'static str, description: &'static str, resource: &str, args: Vec<ArgSpec>, build: BuildRequest) -> Self {
        Self {
            name,
            description,
            args,
            permission: Permission::read(resource),
            mutating: false,
            effects: Vec::new(),
            build,
        }
    }

    fn write(
        name: &'static str,
        description: &'static str,
        resource: &str,
        args: Vec<ArgSpec>,
        effects: Vec<Effect>,
        build: BuildRequest,
    ) -> Self {
        Self {
            name,
            description,
            args,
            permission: Permission::write(resource),
            mutating: true,
            effects,
            build,
        }
    }

    pub fn upstream_request(&self, args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
        (self.build)(args)
    }
}

fn required<'a>(args: &'a Arguments, name: &str) -> Result<&'a str, GatewayError> {
    str_arg(args, name).ok_or_else(|| GatewayError::Internal(format!("Validated argument '{}' is missing", name)))
}

fn item_path(endpoint: &str, id: &str) -> String {
    format!("{}/{}", endpoint, urlencoding::encode(id))
}

fn listing(endpoint: &str, args: &Arguments, default_limit: i64, extra: &[&str]) -> UpstreamRequest {
    let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(default_limit);
    let offset = args.get("offset").and_then(Value::as_i64).unwrap_or(0);
    let mut request = UpstreamRequest::get(endpoint)
        .with_query("limit", limit.to_string())
        .with_query("offset", offset.to_string());

    if let Some(Value::Object(filters)) = args.get("filters") {
        for (name, value) in filters.iter().filter(|(name, _)| !matches!(name.as_str(), "limit" | "offset")) {
            request = request.with_query(name.clone(), query_text(value));
        }
    }
    for name in extra {
        if let Some(value) = args.get(*name) {
            request = request.with_query(*name, query_text(value));
        }
    }
    request
}

fn paging_args() -> Vec<ArgSpec> {
    vec![
        ArgSpec::object("filters", "Optional filters (customer_id, status, date_range)"),
        ArgSpec::integer("limit", 1, MAX_LIMIT, "Number of results").default_value(json!(DEFAULT_TOOL_LIMIT)),
        ArgSpec::integer("offset", 0, MAX_OFFSET, "Offset for pagination").default_value(json!(0)),
    ]
}

fn body_of(args: &Arguments) -> Value {
    Value::Object(args.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn list_invoices(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(listing("invoices", args, DEFAULT_TOOL_LIMIT, &[]))
}

fn get_invoice_details(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(UpstreamRequest::get(item_path("invoices", required(args, "invoice_id")?)))
}

fn create_invoice(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(UpstreamRequest::post("invoices", body_of(args)))
}

fn update_invoice(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    let data = args.get("data").cloned().unwrap_or_else(|| json!({}));
    Ok(UpstreamRequest::put(item_path("invoices", required(args, "invoice_id")?), data))
}

fn delete_invoice(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(UpstreamRequest::delete(item_path("invoices", required(args, "invoice_id")?)))
}

fn search_invoices(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    let query = required(args, "query")?;
    Ok(listing("invoices", args, DEFAULT_SEARCH_LIMIT, &[]).with_query("search", query))
}

fn batch_get_invoices(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    let ids = args.get("invoice_ids").cloned().unwrap_or_else(|| json!([]));
    Ok(UpstreamRequest::post("invoices/batch", json!({ "ids": ids })))
}

fn list_customers(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(listing("customers", args, DEFAULT_TOOL_LIMIT, &[]))
}

fn get_customer_details(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(UpstreamRequest::get(item_path("customers", required(args, "customer_id")?)))
}

fn create_customer(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(UpstreamRequest::post("customers", body_of(args)))
}

fn update_customer(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    let data = args.get("data").cloned().unwrap_or_else(|| json!({}));
    Ok(UpstreamRequest::put(item_path("customers", required(args, "customer_id")?), data))
}

fn list_products(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(listing("products", args, DEFAULT_TOOL_LIMIT, &["category"]))
}

fn get_product_details(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(UpstreamRequest::get(item_path("products", required(args, "product_id")?)))
}

fn list_orders(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(listing("orders", args, DEFAULT_TOOL_LIMIT, &[]))
}

fn get_order_details(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(UpstreamRequest::get(item_path("orders", required(args, "order_id")?)))
}

fn get_financial_summary(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(UpstreamRequest::get(item_path("financial/summary", required(args, "period")?)))
}

fn validate_qr_code(args: &Arguments) -> Result<UpstreamRequest, GatewayError> {
    Ok(UpstreamRequest::post("qr/validate", json!({ "qr_code": required(args, "qr_hex")? })))
}

pub fn erp_tools() -> Vec<ToolSpec> {
    let invoice_id = || ArgSpec::string("invoice_id", "Invoice ID").required();
    let customer_id = || ArgSpec::string("customer_id", "Customer ID").required();

    vec![
        ToolSpec::read("list_invoices", "List invoices with optional filters", "invoices", paging_args(), list_invoices),
        ToolSpec::read(
            "get_invoice_details",
            "Get detailed information about a specific invoice",
            "invoices",
            vec![invoice_id()],
            get_invoice_details,
        ),
        ToolSpec::write(
            "create_invoice",
            "Create a new invoice",
            "invoices",
            vec![
                ArgSpec::string("customer_id", "Customer the invoice is addressed to").required(),
                ArgSpec::number("amount", "Total amount").required(),
                ArgSpec::string("currency", "ISO currency code"),
                ArgSpec::string("due_date", "Due date (YYYY-MM-DD)"),
                ArgSpec::array("items", "Line items"),
                ArgSpec::string("notes", "Free-form notes"),
            ],
            vec![Effect::listings("invoices"), Effect::everything("financial")],
            create_invoice,
        ),
        ToolSpec::write(
            "update_invoice",
            "Update an existing invoice",
            "invoices",
            vec![invoice_id(), ArgSpec::object("data", "Fields to update").required()],
            vec![Effect::everything("invoices"), Effect::everything("financial")],
            update_invoice,
        ),
        ToolSpec::write(
            "delete_invoice",
            "Delete an invoice",
            "invoices",
            vec![invoice_id()],
            vec![Effect::everything("invoices"), Effect::everything("financial")],
            delete_invoice,
        ),
        ToolSpec::read(
            "search_invoices",
            "Search invoices by keyword",
            "invoices",
            vec![
                ArgSpec::string("query", "Search keyword").required(),
                ArgSpec::integer("limit", 1, MAX_LIMIT, "Number of results").default_value(json!(DEFAULT_SEARCH_LIMIT)),
            ],
            search_invoices,
        ),
        ToolSpec::read(
            "batch_get_invoices",
            "Get multiple invoices in one request",
            "invoices",
            vec![ArgSpec::string_array("invoice_ids", MAX_BATCH, "Invoice IDs").required()],
            batch_get_invoices,
        ),
        ToolSpec::read("list_customers", "List customers", "customers", paging_args(), list_customers),
        ToolSpec::read(
            "get_customer_details",
            "Get customer details",
            "customers",
            vec![customer_id()],
            get_customer_details,
        ),
        ToolSpec::write(
            "create_customer",
            "Create new customer",
            "customers",
            vec![
                ArgSpec::string("name", "Customer name").required(),
                ArgSpec::string("email", "Contact email").required().format(ArgFormat::Email),
                ArgSpec::string("phone", "Contact phone"),
                ArgSpec::string("address", "Postal address"),
            ],
            vec![Effect::listings("customers")],
            create_customer,
        ),
        ToolSpec::write(
            "update_customer",
            "Update customer",
            "customers",
            vec![customer_id(), ArgSpec::object("data", "Fields to update").required()],
            vec![Effect::everything("customers")],
            update_customer,
        ),
        ToolSpec::read(
            "list_products",
            "List products",
            "products",
            vec![
                ArgSpec::string("category", "Product category"),
                ArgSpec::integer("limit", 1, MAX_LIMIT, "Number of results").default_value(json!(DEFAULT_TOOL_LIMIT)),
                ArgSpec::integer("offset", 0, MAX_OFFSET, "Offset for pagination").default_value(json!(0)),
            ],
            list_products,
        ),
        ToolSpec::read(
            "get_product_details",
            "Get product details",
            "products",
            vec![ArgSpec::string("product_id", "Product ID").required()],
            get_product_details,
        ),
        ToolSpec::read("list_orders", "List orders", "orders", paging_args(), list_orders),
        ToolSpec::read(
            "get_order_details",
            "Get order details",
            "orders",
            vec![ArgSpec::string("order_id", "Order ID").required()],
            get_order_details,
        ),
        ToolSpec::read(
            "get_financial_summary",
            "Get financial summary",
            "financial",
            vec![ArgSpec::string("period", "Period (YYYY-MM)").required().format(ArgFormat::Period)],
            get_financial_summary,
        ),
        ToolSpec::read(
            "validate_qr_code",
            "Validate QR code and retrieve associated data",
            "qr",
            vec![ArgSpec::string("qr_hex", "QR payload, hex encoded").required().format(ArgFormat::Hex)],
            validate_qr_code,
        ),
    ]
}
