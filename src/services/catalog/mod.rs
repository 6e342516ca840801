//! The startup-built table of every operation the gateway exposes.
//!
//! Each entry carries its argument schema, the permissions it requires and
//! how it maps onto the ERP. Tools declare which resources they affect; the
//! cache invalidation patterns are derived from those declarations.

pub mod prompts;
pub mod resources;
pub mod tools;

pub use prompts::{PromptMessage, PromptSpec};
pub use resources::{ResourceKind, ResourceSpec};
pub use tools::{Effect, EffectScope, ToolSpec};

use log::info;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};

use crate::error::AppError;
use crate::models::{Arguments, OperationClass, Permission};
use crate::services::cache::{CacheKeys, GlobPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer { min: i64, max: i64 },
    Number,
    Boolean,
    Object,
    Array,
    StringArray { max_items: usize },
}

impl ArgKind {
    fn json_type(self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Integer { .. } => "integer",
            ArgKind::Number => "number",
            ArgKind::Boolean => "boolean",
            ArgKind::Object => "object",
            ArgKind::Array | ArgKind::StringArray { .. } => "array",
        }
    }
}

/// Textual shapes checked on top of the string type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgFormat {
    /// `YYYY-MM`
    Period,
    Email,
    Hex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub format: Option<ArgFormat>,
    pub default: Option<Value>,
}

impl ArgSpec {
    fn new(name: &'static str, kind: ArgKind, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind,
            required: false,
            format: None,
            default: None,
        }
    }

    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ArgKind::String, description)
    }

    pub fn integer(name: &'static str, min: i64, max: i64, description: &'static str) -> Self {
        Self::new(name, ArgKind::Integer { min, max }, description)
    }

    pub fn number(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ArgKind::Number, description)
    }

    pub fn boolean(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ArgKind::Boolean, description)
    }

    pub fn object(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ArgKind::Object, description)
    }

    pub fn array(name: &'static str, description: &'static str) -> Self {
        Self::new(name, ArgKind::Array, description)
    }

    pub fn string_array(name: &'static str, max_items: usize, description: &'static str) -> Self {
        Self::new(name, ArgKind::StringArray { max_items }, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn format(mut self, format: ArgFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.kind.json_type()));
        schema.insert("description".into(), json!(self.description));
        match self.kind {
            ArgKind::Integer { min, max } => {
                schema.insert("minimum".into(), json!(min));
                schema.insert("maximum".into(), json!(max));
            }
            ArgKind::StringArray { max_items } => {
                schema.insert("items".into(), json!({"type": "string"}));
                schema.insert("maxItems".into(), json!(max_items));
            }
            _ => {}
        }
        match self.format {
            Some(ArgFormat::Period) => {
                schema.insert("pattern".into(), json!("^[0-9]{4}-(0[1-9]|1[0-2])$"));
            }
            Some(ArgFormat::Email) => {
                schema.insert("format".into(), json!("email"));
            }
            Some(ArgFormat::Hex) => {
                schema.insert("pattern".into(), json!("^[0-9A-Fa-f]+$"));
            }
            None => {}
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        Value::Object(schema)
    }
}

/// JSON-schema style description of an argument list.
pub fn input_schema(args: &[ArgSpec]) -> Value {
    let properties: Map<String, Value> = args.iter().map(|arg| (arg.name.to_string(), arg.schema())).collect();
    let required: Vec<&str> = args.iter().filter(|arg| arg.required).map(|arg| arg.name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// A resolved catalogue entry.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    Resource(&'a ResourceSpec),
    Tool(&'a ToolSpec),
    Prompt(&'a PromptSpec),
}

impl<'a> Operation<'a> {
    pub fn class(&self) -> OperationClass {
        match self {
            Operation::Resource(_) => OperationClass::Resource,
            Operation::Tool(_) => OperationClass::Tool,
            Operation::Prompt(_) => OperationClass::Prompt,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Resource(spec) => spec.name,
            Operation::Tool(spec) => spec.name,
            Operation::Prompt(spec) => spec.name,
        }
    }

    pub fn args(&self) -> &'a [ArgSpec] {
        match self {
            Operation::Resource(spec) => &spec.args,
            Operation::Tool(spec) => &spec.args,
            Operation::Prompt(spec) => &spec.args,
        }
    }

    /// Every permission the caller must hold, checked before any quota is spent.
    pub fn required_permissions(&self, registry: &OperationRegistry) -> Vec<Permission> {
        match self {
            Operation::Resource(spec) => spec.required_permissions(),
            Operation::Tool(spec) => vec![spec.permission.clone()],
            Operation::Prompt(spec) => {
                let mut permissions = vec![Permission::read(prompts::PROMPTS_PERMISSION_RESOURCE)];
                for resource in spec.reads {
                    if let Some(resource) = registry.resource(resource) {
                        permissions.extend(resource.required_permissions());
                    }
                }
                permissions.sort();
                permissions.dedup();
                permissions
            }
        }
    }
}

pub struct OperationRegistry {
    resources: BTreeMap<&'static str, ResourceSpec>,
    tools: BTreeMap<&'static str, ToolSpec>,
    prompts: BTreeMap<&'static str, PromptSpec>,
}

impl OperationRegistry {
    pub fn new(resources: Vec<ResourceSpec>, tools: Vec<ToolSpec>, prompts: Vec<PromptSpec>) -> Self {
        Self {
            resources: resources.into_iter().map(|spec| (spec.name, spec)).collect(),
            tools: tools.into_iter().map(|spec| (spec.name, spec)).collect(),
            prompts: prompts.into_iter().map(|spec| (spec.name, spec)).collect(),
        }
    }

    /// The full ERP catalogue, validated.
    pub fn erp_catalogue() -> Result<Self, AppError> {
        let registry = Self::new(resources::erp_resources(), tools::erp_tools(), prompts::erp_prompts());
        registry.validate()?;
        info!(
            "Operation catalogue loaded: {} resources, {} tools, {} prompts",
            registry.resources.len(),
            registry.tools.len(),
            registry.prompts.len()
        );
        Ok(registry)
    }

    pub fn lookup(&self, class: OperationClass, name: &str) -> Option<Operation<'_>> {
        match class {
            OperationClass::Resource => self.resources.get(name).map(Operation::Resource),
            OperationClass::Tool => self.tools.get(name).map(Operation::Tool),
            OperationClass::Prompt => self.prompts.get(name).map(Operation::Prompt),
        }
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.get(name)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.values()
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    pub fn prompts(&self) -> impl Iterator<Item = &PromptSpec> {
        self.prompts.values()
    }

    /// Checks the declarations that cache invalidation relies on.
    pub fn validate(&self) -> Result<(), AppError> {
        for tool in self.tools.values() {
            if tool.mutating && tool.effects.is_empty() {
                return Err(AppError::Configuration(format!(
                    "Mutating tool '{}' declares no affected resources",
                    tool.name
                )));
            }
            for effect in &tool.effects {
                if !self.resources.contains_key(effect.resource) {
                    return Err(AppError::Configuration(format!(
                        "Tool '{}' declares an effect on unknown resource '{}'",
                        tool.name, effect.resource
                    )));
                }
            }
        }

        for resource in self.resources.values() {
            if let ResourceKind::Composite { parts } = &resource.kind {
                for part in parts.iter() {
                    match self.resources.get(part.resource).map(|spec| &spec.kind) {
                        Some(ResourceKind::Collection { .. }) => {}
                        Some(_) => {
                            return Err(AppError::Configuration(format!(
                                "Composite resource '{}' embeds '{}', which is not a collection",
                                resource.name, part.resource
                            )));
                        }
                        None => {
                            return Err(AppError::Configuration(format!(
                                "Composite resource '{}' embeds unknown resource '{}'",
                                resource.name, part.resource
                            )));
                        }
                    }
                }
            }
        }

        for prompt in self.prompts.values() {
            for resource in prompt.reads {
                if !self.resources.contains_key(resource) {
                    return Err(AppError::Configuration(format!(
                        "Prompt '{}' reads unknown resource '{}'",
                        prompt.name, resource
                    )));
                }
            }
        }

        Ok(())
    }

    /// Derives, for every tool, the patterns to invalidate after it succeeds.
    ///
    /// Each declared effect covers the resource itself and every composite
    /// resource that embeds it.
    pub fn invalidation_plan(&self, keys: &CacheKeys) -> HashMap<&'static str, Vec<GlobPattern>> {
        let mut plan = HashMap::new();
        for tool in self.tools.values() {
            let mut patterns: Vec<GlobPattern> = Vec::new();
            let mut push = |pattern: GlobPattern| {
                if !patterns.contains(&pattern) {
                    patterns.push(pattern);
                }
            };

            for effect in &tool.effects {
                push(match effect.scope {
                    EffectScope::Listings => keys.list_pattern(effect.resource),
                    EffectScope::Everything => keys.resource_pattern(effect.resource),
                });
                for composite in self.resources.values() {
                    if composite.embeds(effect.resource) {
                        push(keys.resource_pattern(composite.name));
                    }
                }
            }

            if !patterns.is_empty() {
                plan.insert(tool.name, patterns);
            }
        }
        plan
    }
}

/// Reads a string argument that validation has already guaranteed.
pub(crate) fn str_arg<'a>(args: &'a Arguments, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Renders a scalar argument the way the ERP expects it in a query string.
pub(crate) fn query_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
