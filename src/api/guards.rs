//! Caller identity. Authentication happens upstream; the gateway forwards the verified user id
//! and role as headers and this module only reads them.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::errors::ApiError;
use crate::db::models::TestSession;

pub(crate) const USER_ID_HEADER: &str = "x-user-id";
pub(crate) const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone)]
pub(crate) struct Caller {
    pub(crate) user_id: String,
    pub(crate) role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(parts, USER_ID_HEADER)
            .ok_or(ApiError::Unauthorized("Missing caller identity"))?;
        let role = header_value(parts, USER_ROLE_HEADER)
            .and_then(Role::parse)
            .ok_or(ApiError::Unauthorized("Missing or unknown caller role"))?;

        Ok(Caller { user_id: user_id.to_string(), role })
    }
}

impl Caller {
    pub(crate) fn require_teacher(&self) -> Result<(), ApiError> {
        match self.role {
            Role::Teacher | Role::Admin => Ok(()),
            Role::Student => Err(ApiError::Forbidden("Teacher access required")),
        }
    }

    pub(crate) fn require_student(&self) -> Result<(), ApiError> {
        match self.role {
            Role::Student => Ok(()),
            Role::Teacher | Role::Admin => Err(ApiError::Forbidden("Student access required")),
        }
    }

    /// The creating teacher, or an admin.
    pub(crate) fn require_owner(&self, session: &TestSession) -> Result<(), ApiError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Teacher if session.created_by == self.user_id => Ok(()),
            Role::Teacher | Role::Student => {
                Err(ApiError::Forbidden("Not enough permissions for this session"))
            }
        }
    }
}
