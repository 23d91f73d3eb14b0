use axum::extract::FromRequestParts;
use axum::http::{StatusCode, header, request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::{AppState, users};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub exp: i64,
}

/// The identity bound to a connection. Anonymous survives until the
/// authorization check at join time, which closes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated { id: i64, display_name: String },
    Anonymous,
}

#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> jsonwebtoken::errors::Result<Claims> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
    }

    /// Mint an access token. The real issuer lives in the main backend;
    /// this exists for tests and local development.
    pub fn issue(&self, user_id: i64, ttl: Duration) -> jsonwebtoken::errors::Result<String> {
        let claims = Claims {
            user_id,
            exp: (OffsetDateTime::now_utc() + ttl).unix_timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
    }

    /// Resolve a socket-upgrade token to an identity. Every failure mode
    /// downgrades to Anonymous; rejection happens later, at join.
    pub async fn resolve(&self, token: Option<&str>, db_pool: &SqlitePool) -> Identity {
        let Some(token) = token else {
            return Identity::Anonymous;
        };

        let claims = match self.verify(token) {
            Ok(claims) => claims,
            Err(err) => {
                debug!("rejecting connection token: {err}");
                return Identity::Anonymous;
            }
        };

        match users::lookup_by_id(db_pool, claims.user_id).await {
            Ok(Some(user)) => Identity::Authenticated {
                id: user.id,
                display_name: user.display_name().to_owned(),
            },
            Ok(None) => {
                debug!("token references unknown user {}", claims.user_id);
                Identity::Anonymous
            }
            Err(err) => {
                warn!("identity lookup failed: {err:#}");
                Identity::Anonymous
            }
        }
    }
}

/// Bearer-token extractor for the REST endpoints.
pub struct AuthUser(pub users::User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let claims = state
            .verifier
            .verify(token)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        let user = users::lookup_by_id(&state.db_pool, claims.user_id)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser(user))
    }
}
