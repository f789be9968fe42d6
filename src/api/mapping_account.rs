use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, Set,
};
use serde_json::json;
use uuid::Uuid;

use crate::entities::{connection, mapping_account};
use crate::ports::MappingPort;

#[derive(serde::Deserialize)]
pub struct CreateMappingAccountRequest {
    username: String,
    access_token: String,
    refresh_token: String,
    feature_service_url: Option<String>,
}

pub async fn create_mapping_account(
    Extension(db): Extension<DatabaseConnection>,
    Extension(org_id): Extension<Uuid>,
    Json(payload): Json<CreateMappingAccountRequest>,
) -> Response {
    let now = chrono::Utc::now().naive_utc();
    let new_account = mapping_account::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(org_id),
        username: Set(payload.username),
        access_token: Set(payload.access_token),
        refresh_token: Set(payload.refresh_token),
        feature_service_url: Set(payload.feature_service_url),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    };

    match new_account.insert(&db).await {
        Ok(account) => {
            tracing::Span::current()
                .record("table", "mapping_accounts")
                .record("action", "create_mapping_account");
            (StatusCode::CREATED, Json(account)).into_response()
        }
        Err(e) => {
            let error_msg = e.to_string();
            if error_msg.contains("duplicate key value violates unique constraint") {
                return (
                    StatusCode::CONFLICT,
                    Json(json!({"error": "A mapping account already exists for this organization"})),
                )
                    .into_response();
            }
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": error_msg})),
            )
                .into_response()
        }
    }
}

pub async fn list_mapping_accounts(
    Extension(db): Extension<DatabaseConnection>,
    Extension(org_id): Extension<Uuid>,
) -> Response {
    match mapping_account::Entity::find()
        .filter(mapping_account::Column::OrganizationId.eq(org_id))
        .all(&db)
        .await
    {
        Ok(accounts) => (StatusCode::OK, Json(accounts)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn load_account(
    db: &DatabaseConnection,
    org_id: Uuid,
    account_id: Uuid,
) -> Result<mapping_account::Model, Response> {
    match mapping_account::Entity::find_by_id(account_id).one(db).await {
        Ok(Some(account)) if account.organization_id == org_id => Ok(account),
        Ok(_) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Mapping account not found"})),
        )
            .into_response()),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response()),
    }
}

/// A mapping account cannot be removed while AGOL connections still depend on
/// its credentials for teardown.
pub async fn delete_mapping_account(
    Extension(db): Extension<DatabaseConnection>,
    Extension(org_id): Extension<Uuid>,
    Path(account_id): Path<Uuid>,
) -> Response {
    let account = match load_account(&db, org_id, account_id).await {
        Ok(account) => account,
        Err(resp) => return resp,
    };

    let in_use = connection::Entity::find()
        .filter(connection::Column::MappingAccountId.eq(account_id))
        .count(&db)
        .await
        .unwrap_or(0);
    if in_use > 0 {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "error": format!("{} connection(s) still use this mapping account, disable their AGOL output first", in_use)
            })),
        )
            .into_response();
    }

    match account.delete(&db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"message": "Mapping account deleted"})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// Liveness check against the mapping provider. May rotate the account's
/// short-lived access token at the provider side.
pub async fn verify_mapping_account(
    Extension(db): Extension<DatabaseConnection>,
    Extension(mapping): Extension<Arc<dyn MappingPort>>,
    Extension(org_id): Extension<Uuid>,
    Path(account_id): Path<Uuid>,
) -> Response {
    let account = match load_account(&db, org_id, account_id).await {
        Ok(account) => account,
        Err(resp) => return resp,
    };

    match mapping.verify_token_valid(&account).await {
        Ok(valid) => (StatusCode::OK, Json(json!({"valid": valid}))).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
