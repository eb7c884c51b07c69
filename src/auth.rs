use crate::{error::AppError, models::Identity, AppState};
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Token verification ─────────────────────────────────────────────────────

/// Claims carried by the auth provider's ID token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: u64,
}

/// Verifies bearer tokens issued by the external auth provider.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl TokenVerifier {
    /// Without a secret no token is ever accepted and everyone is a guest.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decode and validate `token`. Any failure means "no identity".
    pub fn verify(&self, token: &str) -> Option<Identity> {
        let key = self.key.as_ref()?;
        match decode::<Claims>(token, key, &self.validation) {
            Ok(data) => Some(Identity {
                id: data.claims.sub,
                email: data.claims.email,
                display_name: data.claims.name,
            }),
            Err(e) => {
                tracing::debug!("rejected bearer token: {}", e);
                None
            }
        }
    }
}

fn bearer_identity(parts: &Parts, verifier: &TokenVerifier) -> Option<Identity> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))?;
    verifier.verify(token.trim())
}

// ── Extractors ─────────────────────────────────────────────────────────────

/// The caller's identity if they sent a valid token, otherwise `None`
/// (guest). Never rejects.
pub struct MaybeUser(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);
        Ok(MaybeUser(bearer_identity(parts, &state.tokens)))
    }
}

/// Extractor that requires a signed-in user. Handlers that take it never run
/// for guests; the request is rejected with 401.
pub struct AuthUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);
        bearer_identity(parts, &state.tokens)
            .map(AuthUser)
            .ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
pub(crate) fn issue_token(secret: &str, sub: &str, email: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: sub.to_owned(),
        email: email.to_owned(),
        name: Some("Test User".into()),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
