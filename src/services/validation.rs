use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::ValidationError;
use crate::models::Arguments;
use crate::services::catalog::{ArgFormat, ArgKind, ArgSpec};

static PERIOD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-(0[1-9]|1[0-2])$").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());
static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]+$").unwrap());

/// Checks `args` against `specs` and returns them with scalar strings coerced
/// to the declared types.
///
/// Query strings and resource URIs deliver every value as a string, so
/// `"10"` is accepted where an integer is declared. Anything unknown,
/// missing, mistyped or longer than `max_len` characters is rejected.
pub fn validate_arguments(specs: &[ArgSpec], args: Arguments, max_len: usize) -> Result<Arguments, ValidationError> {
    if let Some(unknown) = args.keys().find(|name| !specs.iter().any(|spec| spec.name == name.as_str())) {
        return Err(ValidationError::new(unknown, "unknown argument"));
    }

    if let Some(missing) = specs
        .iter()
        .find(|spec| spec.required && args.get(spec.name).is_none_or(Value::is_null))
    {
        return Err(ValidationError::new(missing.name, "required argument is missing"));
    }

    let mut validated = Arguments::new();
    for (name, value) in args {
        let Some(spec) = specs.iter().find(|spec| spec.name == name) else {
            continue;
        };
        // An explicit null on an optional argument means "not given".
        if value.is_null() {
            continue;
        }
        let value = check_value(spec, value, max_len)?;
        validated.insert(name, value);
    }
    Ok(validated)
}

fn check_value(spec: &ArgSpec, value: Value, max_len: usize) -> Result<Value, ValidationError> {
    let invalid = |reason: String| ValidationError::new(spec.name, reason);

    let value = match spec.kind {
        ArgKind::String => match value {
            Value::String(_) => value,
            Value::Number(n) => Value::String(n.to_string()),
            _ => return Err(invalid("expected a string".into())),
        },
        ArgKind::Integer { min, max } => {
            let number = match &value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| invalid("expected an integer".into()))?;
            if number < min || number > max {
                return Err(invalid(format!("must be between {} and {}", min, max)));
            }
            Value::from(number)
        }
        ArgKind::Number => match &value {
            Value::Number(_) => value,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Value::from)
                .ok_or_else(|| invalid("expected a number".into()))?,
            _ => return Err(invalid("expected a number".into())),
        },
        ArgKind::Boolean => match &value {
            Value::Bool(_) => value,
            Value::String(s) if s == "true" => Value::Bool(true),
            Value::String(s) if s == "false" => Value::Bool(false),
            _ => return Err(invalid("expected a boolean".into())),
        },
        ArgKind::Object => match value {
            Value::Object(_) => value,
            _ => return Err(invalid("expected an object".into())),
        },
        ArgKind::Array => match value {
            Value::Array(_) => value,
            _ => return Err(invalid("expected an array".into())),
        },
        ArgKind::StringArray { max_items } => match &value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(invalid("must not be empty".into()));
                }
                if items.len() > max_items {
                    return Err(invalid(format!("at most {} items allowed", max_items)));
                }
                if !items.iter().all(Value::is_string) {
                    return Err(invalid("expected an array of strings".into()));
                }
                value
            }
            _ => return Err(invalid("expected an array of strings".into())),
        },
    };

    check_lengths(spec.name, &value, max_len)?;

    if let (Some(format), Value::String(text)) = (spec.format, &value) {
        let (ok, expected) = match format {
            ArgFormat::Period => (PERIOD_RE.is_match(text), "a period formatted YYYY-MM"),
            ArgFormat::Email => (EMAIL_RE.is_match(text), "an email address"),
            ArgFormat::Hex => (HEX_RE.is_match(text), "a hexadecimal string"),
        };
        if !ok {
            return Err(invalid(format!("expected {}", expected)));
        }
    }

    Ok(value)
}

/// Every string anywhere inside `value` must fit in `max_len` characters.
fn check_lengths(field: &str, value: &Value, max_len: usize) -> Result<(), ValidationError> {
    match value {
        Value::String(s) if s.chars().count() > max_len => Err(ValidationError::new(
            field,
            format!("longer than {} characters", max_len),
        )),
        Value::Array(items) => items.iter().try_for_each(|item| check_lengths(field, item, max_len)),
        Value::Object(map) => map.iter().try_for_each(|(key, item)| {
            if key.chars().count() > max_len {
                return Err(ValidationError::new(field, format!("key longer than {} characters", max_len)));
            }
            check_lengths(field, item, max_len)
        }),
        _ => Ok(()),
    }
}
