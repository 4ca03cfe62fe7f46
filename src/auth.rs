use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::Role;
use crate::state::AppState;

/// Header carrying the id of the user a trusted gateway has authenticated.
pub const ACTOR_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{} role required, actor is {}",
                role, self.role
            )))
        }
    }

    pub fn require_self(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.id == user_id {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "actor {} may not act for user {user_id}",
                self.id
            )))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("missing {ACTOR_HEADER} header")))?
            .to_str()
            .map_err(|_| AppError::Unauthorized(format!("malformed {ACTOR_HEADER} header")))?;

        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::Unauthorized(format!("malformed {ACTOR_HEADER} header")))?;

        let user = state
            .store
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::Unauthorized(format!("unknown user {id}")))?;

        Ok(Actor {
            id: user.id,
            role: user.role,
        })
    }
}
