use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

use crate::entities::connection;

/// Read-only view of the connection rows backing a source account's outputs.
pub async fn list_source_connections(
    Extension(db): Extension<DatabaseConnection>,
    Extension(org_id): Extension<Uuid>,
    Path(account_id): Path<Uuid>,
) -> Response {
    match connection::Entity::find()
        .filter(connection::Column::OrganizationId.eq(org_id))
        .filter(connection::Column::SourceAccountId.eq(account_id))
        .all(&db)
        .await
    {
        Ok(connections) => (StatusCode::OK, Json(connections)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

pub async fn list_connections(
    Extension(db): Extension<DatabaseConnection>,
    Extension(org_id): Extension<Uuid>,
) -> Response {
    match connection::Entity::find()
        .filter(connection::Column::OrganizationId.eq(org_id))
        .all(&db)
        .await
    {
        Ok(connections) => (StatusCode::OK, Json(connections)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
