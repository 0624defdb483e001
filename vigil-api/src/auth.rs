// ---------------------------------------------------------------------------
// Authentication middleware
// ---------------------------------------------------------------------------

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::ApiErrorBody;
use crate::state::AppState;

/// Who is calling. `None` is anonymous or the server API key, neither of
/// which owns scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity(pub Option<String>);

impl Identity {
    pub fn user(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Outcome of checking a presented bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCheck {
    /// Matches a configured user token.
    User(String),
    /// Matches the server API key.
    ApiKey,
    Invalid,
}

/// Hash a plaintext token to a 32-byte SHA-256 digest.
pub fn hash_token(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Compare `token` against the API key and every user token in constant
/// time per candidate.
pub fn check_token(state: &AppState, token: &str) -> TokenCheck {
    let provided = Sha256::digest(token.as_bytes());
    for (hash, user_id) in &state.user_tokens {
        if bool::from(hash.ct_eq(provided.as_slice())) {
            return TokenCheck::User(user_id.clone());
        }
    }
    if let Some(ref expected) = state.api_key_hash
        && bool::from(expected.ct_eq(provided.as_slice()))
    {
        return TokenCheck::ApiKey;
    }
    TokenCheck::Invalid
}

fn reject(error: &str, message: &str) -> (StatusCode, Json<ApiErrorBody>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiErrorBody {
            error: error.into(),
            message: message.into(),
        }),
    )
}

/// Resolve the caller's [`Identity`] and enforce the API key.
///
/// Without `--api-key` anonymous requests pass; a presented token must still
/// be valid. With it, every request needs `Authorization: Bearer <token>`
/// carrying the key or a user token.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiErrorBody>)> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());

    let identity = match auth_header {
        Some(header) => {
            let Some(token) = header.strip_prefix("Bearer ") else {
                return Err(reject(
                    "invalid_scheme",
                    "Expected 'Bearer <token>' authorization",
                ));
            };
            match check_token(&state, token) {
                TokenCheck::User(user_id) => Identity(Some(user_id)),
                TokenCheck::ApiKey => Identity(None),
                TokenCheck::Invalid => return Err(reject("invalid_token", "Invalid API key")),
            }
        }
        None if state.api_key_hash.is_some() => {
            return Err(reject("missing_token", "Authorization header required"));
        }
        None => Identity(None),
    };

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
