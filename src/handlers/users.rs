use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use callmeter::ExecutionContext;

use super::AppError;
use crate::store::User;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "viewer".into()
}

// ─── GET /api/users/:id ──────────────────────────────────────────

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<ExecutionContext>>,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    match state.users.fetch(&ctx, &id).await? {
        Some(user) => Ok(Json(user)),
        None => Err(AppError::NotFound(format!("user '{id}' not found"))),
    }
}

// ─── POST /api/users ─────────────────────────────────────────────

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<ExecutionContext>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, AppError> {
    if req.name.trim().is_empty() || !req.email.contains('@') {
        return Err(AppError::BadRequest("name and a valid email are required".into()));
    }

    let user = User {
        id: format!("usr_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
        name: req.name,
        email: req.email,
        role: req.role,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    state.users.create(&ctx, &user).await?;
    ctx.increment("users_created", 1.0);

    Ok(Json(user))
}
