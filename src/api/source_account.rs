use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, ModelTrait,
    QueryFilter, Set,
};
use serde_json::json;
use uuid::Uuid;

use crate::entities::{mapping_account, organization, source_account};
use crate::outputs::{DesiredOutputs, OutputReconciler, SourceKind};

use super::output_error_response;

async fn load_org(
    db: &DatabaseConnection,
    org_id: Uuid,
) -> Result<organization::Model, Response> {
    match organization::Entity::find_by_id(org_id).one(db).await {
        Ok(Some(org)) => Ok(org),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Organization not found"})),
        )
            .into_response()),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response()),
    }
}

async fn resolve_mapping_account(
    db: &DatabaseConnection,
    org_id: Uuid,
) -> Result<Option<mapping_account::Model>, Response> {
    mapping_account::Entity::find()
        .filter(mapping_account::Column::OrganizationId.eq(org_id))
        .filter(mapping_account::Column::Active.eq(true))
        .one(db)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        })
}

async fn load_account(
    db: &DatabaseConnection,
    org_id: Uuid,
    account_id: Uuid,
) -> Result<source_account::Model, Response> {
    match source_account::Entity::find_by_id(account_id).one(db).await {
        Ok(Some(account)) if account.organization_id == org_id && account.deleted_at.is_none() => {
            Ok(account)
        }
        Ok(_) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Source account not found"})),
        )
            .into_response()),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response()),
    }
}

#[derive(serde::Deserialize)]
pub struct CreateSourceAccountRequest {
    kind: String,
    subtype: String,
    label: String,
    #[serde(default)]
    output_agol: bool,
    #[serde(default)]
    output_kml: bool,
    #[serde(default)]
    output_database: bool,
}

pub async fn create_source_account(
    Extension(db): Extension<DatabaseConnection>,
    Extension(reconciler): Extension<Arc<OutputReconciler>>,
    Extension(org_id): Extension<Uuid>,
    Extension(user_id): Extension<i32>,
    Json(payload): Json<CreateSourceAccountRequest>,
) -> Response {
    if SourceKind::parse(&payload.kind).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown source kind '{}'", payload.kind)})),
        )
            .into_response();
    }

    let org = match load_org(&db, org_id).await {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let mapping = match resolve_mapping_account(&db, org_id).await {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let now = chrono::Utc::now().naive_utc();
    let new_account = source_account::ActiveModel {
        id: Set(Uuid::new_v4()),
        organization_id: Set(org_id),
        kind: Set(payload.kind),
        subtype: Set(payload.subtype),
        label: Set(payload.label),
        output_agol: Set(payload.output_agol),
        output_kml: Set(payload.output_kml),
        output_database: Set(payload.output_database),
        active: Set(true),
        deleted_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let account = match new_account.insert(&db).await {
        Ok(account) => account,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    };

    let desired = DesiredOutputs::from_account(&account);
    let actor = format!("user:{}", user_id);
    if let Err(e) = reconciler
        .schedule_outputs(desired, &org, &account, mapping.as_ref(), &actor)
        .await
    {
        // Creation is all-or-nothing: the row was inserted in this request
        // and nothing else references it yet, so drop it instead of keeping
        // an account whose flags do not match reality. A sibling output kind
        // may already be on, and its connection row is the only path back to
        // the remote layers and jobs, so tear every output down before the
        // row goes away.
        if let Err(teardown) = reconciler.delete_outputs(&account, mapping.as_ref()).await {
            tracing::error!(error = %teardown, "failed to tear down outputs after enable failure");
        }
        if let Err(del) = account.delete(&db).await {
            tracing::error!(error = %del, "failed to remove account after enable failure");
        }
        return output_error_response(e);
    }

    tracing::Span::current()
        .record("table", "source_accounts")
        .record("action", "create_source_account")
        .record("business_event", "Source account created");
    metrics::gauge!("wildtrace_source_accounts_total").increment(1.0);

    (StatusCode::CREATED, Json(account)).into_response()
}

pub async fn list_source_accounts(
    Extension(db): Extension<DatabaseConnection>,
    Extension(org_id): Extension<Uuid>,
) -> Response {
    match source_account::Entity::find()
        .filter(source_account::Column::OrganizationId.eq(org_id))
        .filter(source_account::Column::DeletedAt.is_null())
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

pub async fn get_source_account(
    Extension(db): Extension<DatabaseConnection>,
    Extension(org_id): Extension<Uuid>,
    Path(account_id): Path<Uuid>,
) -> Response {
    match load_account(&db, org_id, account_id).await {
        Ok(account) => (StatusCode::OK, Json(account)).into_response(),
        Err(resp) => resp,
    }
}

#[derive(serde::Deserialize)]
pub struct UpdateSourceAccountRequest {
    subtype: Option<String>,
    label: Option<String>,
    output_agol: Option<bool>,
    output_kml: Option<bool>,
    output_database: Option<bool>,
}

pub async fn update_source_account(
    Extension(db): Extension<DatabaseConnection>,
    Extension(reconciler): Extension<Arc<OutputReconciler>>,
    Extension(org_id): Extension<Uuid>,
    Extension(user_id): Extension<i32>,
    Path(account_id): Path<Uuid>,
    Json(payload): Json<UpdateSourceAccountRequest>,
) -> Response {
    let account = match load_account(&db, org_id, account_id).await {
        Ok(account) => account,
        Err(resp) => return resp,
    };
    let org = match load_org(&db, org_id).await {
        Ok(org) => org,
        Err(resp) => return resp,
    };
    let mapping = match resolve_mapping_account(&db, org_id).await {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let desired = DesiredOutputs {
        agol: payload.output_agol.unwrap_or(account.output_agol),
        kml: payload.output_kml.unwrap_or(account.output_kml),
        database: payload.output_database.unwrap_or(account.output_database),
    };

    // Reconcile before persisting the flags, so the stored flags only ever
    // reflect state the provider actually accepted.
    let actor = format!("user:{}", user_id);
    if let Err(e) = reconciler
        .update_outputs(desired, &org, &account, mapping.as_ref(), &actor)
        .await
    {
        return output_error_response(e);
    }

    // A renamed device should show its new label on already-exported
    // features. Cosmetic, so a failure does not fail the request.
    if let Some(new_label) = payload.label.as_deref() {
        if new_label != account.label {
            if let Err(e) = reconciler
                .propagate_label_change(&account, new_label, mapping.as_ref())
                .await
            {
                tracing::warn!(error = %e, "failed to propagate label change to remote features");
            }
        }
    }

    let mut active = account.into_active_model();
    if let Some(subtype) = payload.subtype {
        active.subtype = Set(subtype);
    }
    if let Some(label) = payload.label {
        active.label = Set(label);
    }
    active.output_agol = Set(desired.agol);
    active.output_kml = Set(desired.kml);
    active.output_database = Set(desired.database);
    active.updated_at = Set(chrono::Utc::now().naive_utc());

    match active.update(&db).await {
        Ok(account) => {
            tracing::Span::current()
                .record("table", "source_accounts")
                .record("action", "update_source_account");
            (StatusCode::OK, Json(account)).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// Soft delete. Output teardown completes first, then the row is marked
/// deleted; never the reverse, or the identifiers needed to reach remote
/// state would be lost.
pub async fn delete_source_account(
    Extension(db): Extension<DatabaseConnection>,
    Extension(reconciler): Extension<Arc<OutputReconciler>>,
    Extension(org_id): Extension<Uuid>,
    Path(account_id): Path<Uuid>,
) -> Response {
    let account = match load_account(&db, org_id, account_id).await {
        Ok(account) => account,
        Err(resp) => return resp,
    };
    let mapping = match resolve_mapping_account(&db, org_id).await {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    if let Err(e) = reconciler.delete_outputs(&account, mapping.as_ref()).await {
        return output_error_response(e);
    }

    let mut active = account.into_active_model();
    active.active = Set(false);
    active.output_agol = Set(false);
    active.output_kml = Set(false);
    active.output_database = Set(false);
    active.deleted_at = Set(Some(chrono::Utc::now().naive_utc()));
    active.updated_at = Set(chrono::Utc::now().naive_utc());

    match active.update(&db).await {
        Ok(_) => {
            tracing::Span::current()
                .record("table", "source_accounts")
                .record("action", "delete_source_account");
            metrics::gauge!("wildtrace_source_accounts_total").decrement(1.0);
            (StatusCode::OK, Json(json!({"message": "Source account deleted"}))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
