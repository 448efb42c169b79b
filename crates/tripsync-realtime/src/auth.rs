use std::time::Duration;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use tripsync_types::auth::{Authenticator, Claims, CurrentUser};
use tripsync_types::{Result, TripError};

/// Sign a bearer token for `user`, valid for `ttl`.
pub fn issue_token(secret: &str, user: &CurrentUser, ttl: Duration) -> Result<String> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| TripError::Authentication(format!("bad token lifetime: {e}")))?;
    let claims = Claims {
        sub: user.id,
        display_name: user.display_name.clone(),
        avatar_url: user.avatar_url.clone(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TripError::Authentication(e.to_string()))
}

/// Validate signature and expiry.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| TripError::Authentication(e.to_string()))?;
    Ok(data.claims)
}

/// Resolves the session user from a bearer token.
///
/// An expired or tampered token counts as signed out.
#[derive(Clone)]
pub struct JwtAuth {
    token: String,
    secret: String,
}

impl JwtAuth {
    pub fn new(token: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            secret: secret.into(),
        }
    }
}

impl Authenticator for JwtAuth {
    fn current_user(&self) -> Option<CurrentUser> {
        match decode_token(&self.token, &self.secret) {
            Ok(claims) => Some(claims.into()),
            Err(e) => {
                debug!("Session token rejected: {}", e);
                None
            }
        }
    }
}
