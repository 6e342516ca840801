use actix_web::http::header::HeaderMap;
use actix_web::{Error, FromRequest, HttpRequest, dev::Payload};
use std::future::{Ready, ready};

use crate::models::PresentedCredential;

/// Extract the caller's credential from request headers
/// Priority: X-API-Key header, then Authorization: ApiKey, then Authorization: Bearer
pub fn extract_credential(headers: &HeaderMap) -> PresentedCredential {
    if let Some(key) = headers.get("x-api-key").and_then(|value| value.to_str().ok()) {
        let key = key.trim();
        if !key.is_empty() {
            return PresentedCredential::ApiKey(key.to_string());
        }
    }

    if let Some(auth) = headers.get("authorization").and_then(|value| value.to_str().ok()) {
        if let Some(key) = auth.strip_prefix("ApiKey ") {
            return PresentedCredential::ApiKey(key.trim().to_string());
        }
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return PresentedCredential::Bearer(token.trim().to_string());
        }
    }

    PresentedCredential::None
}

// Verification happens in the dispatcher; extraction never rejects.
impl FromRequest for PresentedCredential {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(extract_credential(req.headers())))
    }
}
