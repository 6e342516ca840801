use actix_web::{HttpResponse, web};
use log::info;
use serde::Serialize;
use tracing::instrument;

use crate::error::AppError;
use crate::models::{CredentialKind, Permission, PresentedCredential};
use crate::services::Dispatcher;
use crate::services::auth::JwtService;

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// Exchanges a static API key for a signed token carrying the key's permissions.
#[instrument(skip(dispatcher, jwt, credential))]
pub async fn issue_token(
    dispatcher: web::Data<Dispatcher>,
    jwt: web::Data<JwtService>,
    credential: PresentedCredential,
) -> Result<HttpResponse, AppError> {
    let identity = dispatcher.authenticate(&credential).await?;
    if identity.credential_kind != CredentialKind::StaticKey {
        return Err(AppError::Auth("Token exchange requires a static API key".to_string()));
    }
    dispatcher.admit(&identity).await?;

    let permissions: Vec<Permission> = identity.permissions.iter().cloned().collect();
    let access_token = jwt.issue(&identity.id, &permissions)?;
    info!("Issued signed token for identity {}", identity.id);

    Ok(HttpResponse::Ok().json(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: jwt.token_duration_secs(),
    }))
}
