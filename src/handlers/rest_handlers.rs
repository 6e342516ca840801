use actix_web::{HttpResponse, web};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::instrument;

use crate::error::AppError;
use crate::models::{Arguments, InboundRequest, OperationClass, PresentedCredential, ResponseEnvelope};
use crate::services::Dispatcher;

fn query_arguments(query: HashMap<String, String>) -> Arguments {
    query.into_iter().map(|(name, value)| (name, Value::String(value))).collect()
}

/// An empty body means no arguments; anything else must be a JSON object.
fn body_arguments(body: &[u8]) -> Result<Arguments, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Arguments::new());
    }
    let map: Map<String, Value> = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Request body must be a JSON object: {}", e)))?;
    Ok(map.into_iter().collect())
}

async fn run(dispatcher: &Dispatcher, request: InboundRequest) -> Result<HttpResponse, AppError> {
    let done = dispatcher.execute(request).await?;
    Ok(HttpResponse::Ok().json(ResponseEnvelope::ok(done.payload, done.cache)))
}

pub async fn list_resources(
    dispatcher: web::Data<Dispatcher>,
    credential: PresentedCredential,
) -> Result<HttpResponse, AppError> {
    let listing = dispatcher.list(OperationClass::Resource, &credential).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[instrument(skip(dispatcher, query, credential))]
pub async fn read_resource_list(
    dispatcher: web::Data<Dispatcher>,
    path: web::Path<String>,
    query: web::Query<HashMap<String, String>>,
    credential: PresentedCredential,
) -> Result<HttpResponse, AppError> {
    let resource = path.into_inner();
    let arguments = query_arguments(query.into_inner());
    run(
        &dispatcher,
        InboundRequest::new(OperationClass::Resource, resource, arguments, credential),
    )
    .await
}

#[instrument(skip(dispatcher, query, credential))]
pub async fn read_resource_item(
    dispatcher: web::Data<Dispatcher>,
    path: web::Path<(String, String)>,
    query: web::Query<HashMap<String, String>>,
    credential: PresentedCredential,
) -> Result<HttpResponse, AppError> {
    let (resource, id) = path.into_inner();
    let mut arguments = query_arguments(query.into_inner());
    arguments.insert("id".to_string(), Value::String(id));
    run(
        &dispatcher,
        InboundRequest::new(OperationClass::Resource, resource, arguments, credential),
    )
    .await
}

pub async fn list_tools(
    dispatcher: web::Data<Dispatcher>,
    credential: PresentedCredential,
) -> Result<HttpResponse, AppError> {
    let listing = dispatcher.list(OperationClass::Tool, &credential).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[instrument(skip(dispatcher, body, credential))]
pub async fn call_tool(
    dispatcher: web::Data<Dispatcher>,
    path: web::Path<String>,
    body: web::Bytes,
    credential: PresentedCredential,
) -> Result<HttpResponse, AppError> {
    let arguments = body_arguments(&body)?;
    run(
        &dispatcher,
        InboundRequest::new(OperationClass::Tool, path.into_inner(), arguments, credential),
    )
    .await
}

pub async fn list_prompts(
    dispatcher: web::Data<Dispatcher>,
    credential: PresentedCredential,
) -> Result<HttpResponse, AppError> {
    let listing = dispatcher.list(OperationClass::Prompt, &credential).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[instrument(skip(dispatcher, body, credential))]
pub async fn get_prompt(
    dispatcher: web::Data<Dispatcher>,
    path: web::Path<String>,
    body: web::Bytes,
    credential: PresentedCredential,
) -> Result<HttpResponse, AppError> {
    let arguments = body_arguments(&body)?;
    run(
        &dispatcher,
        InboundRequest::new(OperationClass::Prompt, path.into_inner(), arguments, credential),
    )
    .await
}

/// Everything the caller may use, in one listing.
pub async fn get_capabilities(
    dispatcher: web::Data<Dispatcher>,
    credential: PresentedCredential,
) -> Result<HttpResponse, AppError> {
    let capabilities = dispatcher.capabilities(&credential).await?;
    Ok(HttpResponse::Ok().json(capabilities))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_arguments() {
        assert!(body_arguments(b"").unwrap().is_empty());
        assert!(body_arguments(b"  \n").unwrap().is_empty());
        let args = body_arguments(br#"{"invoice_id": "INV-1"}"#).unwrap();
        assert_eq!(args.get("invoice_id"), Some(&json!("INV-1")));
        assert!(matches!(body_arguments(b"[1, 2]"), Err(AppError::BadRequest(_))));
    }
}
