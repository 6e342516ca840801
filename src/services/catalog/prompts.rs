use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::{ArgFormat, ArgSpec, str_arg};
use crate::models::Arguments;

/// Resource name of the permission gating prompt rendering.
pub const PROMPTS_PERMISSION_RESOURCE: &str = "prompts";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

impl PromptMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Data a prompt needs before it can render, fetched through the resource-read path.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportingRead {
    /// Name the fetched payload is known by while rendering.
    pub key: &'static str,
    pub resource: &'static str,
    pub args: Arguments,
}

impl SupportingRead {
    fn new(key: &'static str, resource: &'static str, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map.into_iter().collect(),
            _ => Arguments::new(),
        };
        Self { key, resource, args }
    }
}

pub struct PromptContext<'a> {
    pub data: &'a Map<String, Value>,
    pub now: DateTime<Utc>,
}

pub type SupportingReads = fn(&Arguments) -> Vec<SupportingRead>;
pub type Render = fn(&Arguments, &PromptContext<'_>) -> Vec<PromptMessage>;

#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: Vec<ArgSpec>,
    /// Every resource `supporting` may read, for up-front permission checks.
    pub reads: &'static [&'static str],
    pub supporting: SupportingReads,
    pub render: Render,
}

impl PromptSpec {
    pub fn supporting_reads(&self, args: &Arguments) -> Vec<SupportingRead> {
        (self.supporting)(args)
    }

    pub fn render(&self, args: &Arguments, context: &PromptContext<'_>) -> Vec<PromptMessage> {
        (self.render)(args, context)
    }

    pub fn describe(&self) -> Value {
        let arguments: Vec<Value> = self
            .args
            .iter()
            .map(|arg| {
                json!({
                    "name": arg.name,
                    "description": arg.description,
                    "required": arg.required,
                })
            })
            .collect();
        json!({
            "name": self.name,
            "description": self.description,
            "arguments": arguments,
        })
    }
}

fn with_data(text: String, context: &PromptContext<'_>, keys: &[&str]) -> String {
    let mut out = text;
    for key in keys {
        if let Some(value) = context.data.get(*key) {
            let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            out.push_str(&format!("\n\n{} data:\n```json\n{}\n```", key, rendered));
        }
    }
    out
}

fn current_period(context: &PromptContext<'_>) -> String {
    context.now.format("%Y-%m").to_string()
}

fn no_reads(_: &Arguments) -> Vec<SupportingRead> {
    Vec::new()
}

fn analyze_invoice_reads(args: &Arguments) -> Vec<SupportingRead> {
    match str_arg(args, "invoice_id") {
        Some(id) => vec![SupportingRead::new("invoice", "invoices", json!({ "id": id }))],
        None => Vec::new(),
    }
}

fn analyze_invoice(args: &Arguments, context: &PromptContext<'_>) -> Vec<PromptMessage> {
    let invoice_id = str_arg(args, "invoice_id").unwrap_or_default();
    let include_customer = args.get("include_customer").and_then(Value::as_bool).unwrap_or(false);

    let system = "You are an expert financial analyst specialising in invoice review.\n\
Examine the invoice for:\n\
1. Correct amounts and calculations\n\
2. Unusual patterns or anomalies\n\
3. Compliance issues\n\
4. Recommended actions\n\n\
Answer with structured findings and recommendations.";
    let user = format!(
        "Analyse invoice {}{}.\nFocus on:\n- Line item calculations\n- Tax compliance\n- Payment terms\n- Any red flags",
        invoice_id,
        if include_customer { " together with its customer details" } else { "" }
    );
    vec![PromptMessage::system(system), PromptMessage::user(with_data(user, context, &["invoice"]))]
}

fn customer_report_reads(args: &Arguments) -> Vec<SupportingRead> {
    match str_arg(args, "customer_id") {
        Some(id) => vec![SupportingRead::new("customer", "customers", json!({ "id": id }))],
        None => Vec::new(),
    }
}

fn customer_report(args: &Arguments, context: &PromptContext<'_>) -> Vec<PromptMessage> {
    let customer_id = str_arg(args, "customer_id").unwrap_or_default();
    let period = str_arg(args, "period")
        .map(str::to_string)
        .unwrap_or_else(|| current_period(context));

    let system = "You are a business analyst producing customer reports.\n\
Cover:\n\
1. Customer profile and history\n\
2. Transaction patterns\n\
3. Financial health\n\
4. Risk assessment\n\
5. Recommendations";
    let user = format!(
        "Produce a report for customer {} covering period {}.\nInclude:\n- Transaction history\n- Payment behaviour\n- Sales trends\n- Engagement recommendations",
        customer_id, period
    );
    vec![PromptMessage::system(system), PromptMessage::user(with_data(user, context, &["customer"]))]
}

fn financial_analysis_reads(args: &Arguments) -> Vec<SupportingRead> {
    let mut reads = Vec::new();
    if let Some(period) = str_arg(args, "period") {
        reads.push(SupportingRead::new("period", "financial", json!({ "id": period })));
    }
    if let Some(previous) = str_arg(args, "comparison_period") {
        reads.push(SupportingRead::new("comparison", "financial", json!({ "id": previous })));
    }
    reads
}

fn financial_analysis(args: &Arguments, context: &PromptContext<'_>) -> Vec<PromptMessage> {
    let period = str_arg(args, "period").unwrap_or_default();
    let comparison = str_arg(args, "comparison_period")
        .map(|previous| format!(" compared to {}", previous))
        .unwrap_or_default();

    let system = "You are a financial analyst working with ERP data.\n\
Report on:\n\
1. Revenue trends\n\
2. Expense patterns\n\
3. Profitability\n\
4. Cash flow\n\
5. Comparison with the reference period when one is given";
    let user = format!(
        "Analyse the financial data for {}{}.\nProvide:\n- Revenue analysis\n- Expense breakdown\n- Profitability metrics\n- Trends and forecasts\n- Key insights",
        period, comparison
    );
    vec![
        PromptMessage::system(system),
        PromptMessage::user(with_data(user, context, &["period", "comparison"])),
    ]
}

fn fraud_detection_reads(_: &Arguments) -> Vec<SupportingRead> {
    vec![SupportingRead::new("recent_invoices", "invoices", json!({ "limit": 100 }))]
}

fn fraud_detection(args: &Arguments, context: &PromptContext<'_>) -> Vec<PromptMessage> {
    let threshold = args.get("threshold").and_then(Value::as_i64).unwrap_or(50);

    let system = "You are a fraud detection specialist reviewing financial transactions.\n\
Look for:\n\
1. Unusual transaction amounts\n\
2. Timing anomalies\n\
3. Geographic inconsistencies\n\
4. Duplicate transactions\n\
5. Third-party payment issues\n\n\
Score risk from 0 to 100 and recommend actions.";
    let user = format!(
        "Assess the transactions for fraud risk (threshold: {}).\nIdentify:\n- High-risk transactions\n- Unusual patterns\n- Duplicate or suspicious entries\n- Investigations to open\n- Prevention measures",
        threshold
    );
    vec![
        PromptMessage::system(system),
        PromptMessage::user(with_data(user, context, &["recent_invoices"])),
    ]
}

fn compliance_check(args: &Arguments, _context: &PromptContext<'_>) -> Vec<PromptMessage> {
    let regulation = str_arg(args, "regulation").unwrap_or("GDPR");

    let system = format!(
        "You are a compliance specialist assessing data against {} requirements.\n\
Check:\n\
1. Data privacy requirements\n\
2. Record keeping standards\n\
3. Reporting obligations\n\
4. Audit trail requirements\n\
5. Risk areas",
        regulation
    );
    let user = format!(
        "Check {} compliance for the provided data.\nAssess:\n- Data handling\n- Privacy requirements\n- Record retention\n- Audit capabilities\n- Risk areas and remediation",
        regulation
    );
    vec![PromptMessage::system(system), PromptMessage::user(user)]
}

pub fn erp_prompts() -> Vec<PromptSpec> {
    vec![
        PromptSpec {
            name: "analyze_invoice",
            description: "Analyze invoice for anomalies and generate summary",
            args: vec![
                ArgSpec::string("invoice_id", "Invoice ID to analyze").required(),
                ArgSpec::boolean("include_customer", "Include customer details in analysis"),
            ],
            reads: &["invoices"],
            supporting: analyze_invoice_reads,
            render: analyze_invoice,
        },
        PromptSpec {
            name: "customer_report",
            description: "Generate comprehensive customer report",
            args: vec![
                ArgSpec::string("customer_id", "Customer ID").required(),
                ArgSpec::string("period", "Reporting period (YYYY-MM)").format(ArgFormat::Period),
            ],
            reads: &["customers"],
            supporting: customer_report_reads,
            render: customer_report,
        },
        PromptSpec {
            name: "financial_analysis",
            description: "Analyze financial data and trends",
            args: vec![
                ArgSpec::string("period", "Period to analyze (YYYY-MM)")
                    .required()
                    .format(ArgFormat::Period),
                ArgSpec::string("comparison_period", "Previous period for comparison").format(ArgFormat::Period),
            ],
            reads: &["financial"],
            supporting: financial_analysis_reads,
            render: financial_analysis,
        },
        PromptSpec {
            name: "fraud_detection",
            description: "Analyze transactions for fraud patterns",
            args: vec![ArgSpec::integer("threshold", 0, 100, "Risk threshold (0-100)").default_value(json!(50))],
            reads: &["invoices"],
            supporting: fraud_detection_reads,
            render: fraud_detection,
        },
        PromptSpec {
            name: "compliance_check",
            description: "Check compliance with regulations",
            args: vec![ArgSpec::string("regulation", "Regulation type (GDPR, HIPAA, etc.)").required()],
            reads: &[],
            supporting: no_reads,
            render: compliance_check,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn prompt(name: &str) -> PromptSpec {
        erp_prompts().into_iter().find(|prompt| prompt.name == name).unwrap()
    }

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Arguments::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_analyze_invoice_embeds_fetched_data() {
        let spec = prompt("analyze_invoice");
        let args = args(json!({"invoice_id": "INV-001", "include_customer": true}));

        let reads = spec.supporting_reads(&args);
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].resource, "invoices");
        assert_eq!(reads[0].args.get("id"), Some(&json!("INV-001")));

        let mut data = Map::new();
        data.insert("invoice".into(), json!({"id": "INV-001", "amount": 120}));
        let messages = spec.render(&args, &PromptContext { data: &data, now: now() });

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[1].content.contains("INV-001 together with its customer details"));
        assert!(messages[1].content.contains("\"amount\": 120"));
    }

    #[test]
    fn test_customer_report_defaults_to_current_period() {
        let data = Map::new();
        let messages = prompt("customer_report").render(
            &args(json!({"customer_id": "C1"})),
            &PromptContext { data: &data, now: now() },
        );
        assert!(messages[1].content.contains("period 2025-03"));
    }

    #[test]
    fn test_financial_analysis_reads_both_periods() {
        let reads = prompt("financial_analysis")
            .supporting_reads(&args(json!({"period": "2025-02", "comparison_period": "2025-01"})));
        let keys: Vec<&str> = reads.iter().map(|read| read.key).collect();
        assert_eq!(keys, vec!["period", "comparison"]);
    }

    #[test]
    fn test_compliance_check_needs_no_data() {
        let spec = prompt("compliance_check");
        assert!(spec.supporting_reads(&args(json!({"regulation": "HIPAA"}))).is_empty());
        let data = Map::new();
        let messages = spec.render(&args(json!({"regulation": "HIPAA"})), &PromptContext { data: &data, now: now() });
        assert!(messages[0].content.contains("HIPAA requirements"));
    }
}
