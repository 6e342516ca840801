use actix_web::{HttpResponse, web};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::instrument;

use crate::error::{GatewayError, ValidationError};
use crate::models::{
    Arguments, CacheProvenance, ErrorDetail, InboundRequest, OperationClass, PresentedCredential, ResponseStatus,
};
use crate::services::Dispatcher;
use crate::services::catalog::resources::{URI_SCHEME, parse_uri};

#[derive(Debug, Deserialize)]
pub struct McpRequest {
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub id: Value,
}

/// Protocol reply. Failures travel in `error` with HTTP 200.
#[derive(Debug, Serialize)]
pub struct McpResponse {
    pub id: Value,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheProvenance>,
}

impl McpResponse {
    fn ok(id: Value, result: Value, cache: Option<CacheProvenance>) -> Self {
        Self {
            id,
            status: ResponseStatus::Ok,
            result: Some(result),
            error: None,
            cache,
        }
    }

    fn failed(id: Value, error: &GatewayError) -> Self {
        Self {
            id,
            status: ResponseStatus::Error,
            result: None,
            error: Some(ErrorDetail::from(error)),
            cache: None,
        }
    }
}

fn string_param(params: &Map<String, Value>, name: &str) -> Result<String, GatewayError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ValidationError::new(name, "required parameter is missing").into())
}

fn arguments_param(params: &Map<String, Value>) -> Result<Arguments, GatewayError> {
    match params.get("arguments") {
        None | Some(Value::Null) => Ok(Arguments::new()),
        Some(Value::Object(map)) => Ok(map.clone().into_iter().collect()),
        Some(_) => Err(ValidationError::new("arguments", "expected an object").into()),
    }
}

async fn execute(
    dispatcher: &Dispatcher,
    class: OperationClass,
    name: String,
    arguments: Arguments,
    credential: PresentedCredential,
) -> Result<(Value, Option<CacheProvenance>), GatewayError> {
    let done = dispatcher
        .execute(InboundRequest::new(class, name, arguments, credential))
        .await?;
    Ok((done.payload, Some(done.cache)))
}

async fn handle(
    dispatcher: &Dispatcher,
    method: &str,
    params: &Map<String, Value>,
    credential: PresentedCredential,
) -> Result<(Value, Option<CacheProvenance>), GatewayError> {
    match method {
        "initialize" => Ok((dispatcher.initialize(), None)),
        "listResources" => Ok((dispatcher.list(OperationClass::Resource, &credential).await?, None)),
        "listTools" => Ok((dispatcher.list(OperationClass::Tool, &credential).await?, None)),
        "listPrompts" => Ok((dispatcher.list(OperationClass::Prompt, &credential).await?, None)),
        "readResource" => {
            let uri = string_param(params, "uri")?;
            let (resource, arguments) = parse_uri(&uri).ok_or_else(|| {
                ValidationError::new("uri", format!("expected {}<resource>[/<id>]", URI_SCHEME))
            })?;
            let (payload, cache) = execute(dispatcher, OperationClass::Resource, resource, arguments, credential).await?;
            let contents = json!({
                "contents": [{
                    "uri": uri,
                    "mimeType": "application/json",
                    "text": payload.to_string(),
                }]
            });
            Ok((contents, cache))
        }
        "callTool" => {
            let name = string_param(params, "name")?;
            let arguments = arguments_param(params)?;
            execute(dispatcher, OperationClass::Tool, name, arguments, credential).await
        }
        "getPrompt" => {
            let name = string_param(params, "name")?;
            let arguments = arguments_param(params)?;
            execute(dispatcher, OperationClass::Prompt, name, arguments, credential).await
        }
        other => Err(GatewayError::UnknownOperation {
            class: "method".to_string(),
            name: other.to_string(),
        }),
    }
}

/// Single protocol endpoint multiplexing every method over one POST.
#[instrument(skip(dispatcher, request, credential), fields(method = %request.method))]
pub async fn mcp_request(
    dispatcher: web::Data<Dispatcher>,
    request: web::Json<McpRequest>,
    credential: PresentedCredential,
) -> HttpResponse {
    let McpRequest { method, params, id } = request.into_inner();
    debug!("Protocol request {} (id {})", method, id);

    let response = match handle(&dispatcher, &method, &params, credential).await {
        Ok((result, cache)) => McpResponse::ok(id, result, cache),
        Err(e) => McpResponse::failed(id, &e),
    };
    HttpResponse::Ok().json(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_param() {
        let params: Map<String, Value> = serde_json::from_value(json!({"arguments": {"invoice_id": "INV-1"}})).unwrap();
        assert_eq!(arguments_param(&params).unwrap().len(), 1);
        assert!(arguments_param(&Map::new()).unwrap().is_empty());

        let params: Map<String, Value> = serde_json::from_value(json!({"arguments": [1]})).unwrap();
        assert!(matches!(arguments_param(&params), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn test_missing_string_param_names_field() {
        match string_param(&Map::new(), "uri") {
            Err(GatewayError::Validation(e)) => assert_eq!(e.field, "uri"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
