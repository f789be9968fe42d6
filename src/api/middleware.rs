use axum::{
    extract::{Extension, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde_json::json;
use tower_cookies::Cookies;

use crate::entities::user;

/// Resolves the session cookie to the acting principal and inserts
/// `(user_id, organization_id)` as request extensions for the handlers.
pub async fn auth_middleware(
    Extension(db): Extension<DatabaseConnection>,
    cookies: Cookies,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = cookies.get("wildtrace_user") {
        if let Ok(user_id) = cookie.value().parse::<i32>() {
            if let Ok(Some(u)) = user::Entity::find_by_id(user_id).one(&db).await {
                request.extensions_mut().insert(u.id);
                request.extensions_mut().insert(u.organization_id);
                return next.run(request).await;
            }
        }
    }
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response()
}
