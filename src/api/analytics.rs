use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};

use crate::api::errors::ApiError;
use crate::api::guards::{Caller, Role};
use crate::core::state::AppState;
use crate::schemas::analytics::AnalyticsParams;
use crate::services::analytics::{self, AnalyticsQuery, AnalyticsScope, AnalyticsSnapshot};

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/", get(snapshot))
}

/// Teachers see their own sessions; admins see the whole tenant.
async fn snapshot(
    caller: Caller,
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<AnalyticsSnapshot>, ApiError> {
    let scope = match caller.role {
        Role::Teacher => AnalyticsScope::Teacher(caller.user_id.clone()),
        Role::Admin => AnalyticsScope::Tenant,
        Role::Student => return Err(ApiError::Forbidden("Teacher access required")),
    };

    let query =
        AnalyticsQuery { scope, classroom_id: params.classroom_id(), subject: params.subject() };
    Ok(Json(analytics::load_snapshot(&state, &query).await?))
}
