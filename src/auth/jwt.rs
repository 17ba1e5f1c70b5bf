use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use uuid::Uuid;

use crate::api::error::ApiError;

/// JWT claims issued by the session service. `sub` carries the user id.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Validate a bearer token and extract the authenticated user id
///
/// Tokens are HS256-signed with JWT_SECRET. Expiry is enforced by the
/// decoder; a token whose subject is not a UUID is rejected as
/// unauthorized rather than malformed, since it cannot identify a caller.
pub fn validate_jwt_and_extract_user(token: &str) -> Result<Uuid, ApiError> {
    let jwt_secret = env::var("JWT_SECRET").map_err(|_| {
        ApiError::Internal("JWT_SECRET environment variable not set".to_string())
    })?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_ref()),
        &validation,
    )
    .map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        ApiError::Unauthorized(format!("Invalid bearer token: {}", e))
    })?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| {
        ApiError::Unauthorized("Bearer token subject is not a valid user id".to_string())
    })
}

/// Extract the token from an Authorization header
/// Expected format: "Bearer <token>"
pub fn extract_bearer_token(auth_header: Option<&str>) -> Result<&str, ApiError> {
    let auth_value = auth_header
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    auth_value.strip_prefix("Bearer ").ok_or_else(|| {
        ApiError::Unauthorized(
            "Invalid Authorization header format, expected 'Bearer <token>'".to_string(),
        )
    })
}
