use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Profile;

/// JWT claims shared by the realtime gateway (WebSocket upgrade) and client
/// sessions that resolve their identity from a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub exp: usize,
}

/// The identity of the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl CurrentUser {
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Denormalized snapshot attached to messages and reactions.
    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id,
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            display_name: claims.display_name,
            avatar_url: claims.avatar_url,
        }
    }
}

/// Resolves the user behind the current session, or `None` when signed out.
pub trait Authenticator: Send + Sync {
    fn current_user(&self) -> Option<CurrentUser>;
}

/// An identity fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth(pub Option<CurrentUser>);

impl StaticAuth {
    pub fn signed_in(user: CurrentUser) -> Self {
        Self(Some(user))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

impl Authenticator for StaticAuth {
    fn current_user(&self) -> Option<CurrentUser> {
        self.0.clone()
    }
}
