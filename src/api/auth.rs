use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde_json::json;
use tower_cookies::{Cookie, Cookies};
use tracing::field::display;
use uuid::Uuid;

use crate::entities::{organization, user};

#[derive(serde::Deserialize)]
pub struct RegisterRequest {
    organization_short_name: String,
    timezone: Option<String>,
    email: String,
    password: String,
    name: String,
}

/// Creates a new organization together with its first user.
pub async fn register(
    Extension(db): Extension<DatabaseConnection>,
    Json(payload): Json<RegisterRequest>,
) -> Response {
    let short_name = payload.organization_short_name.trim().to_lowercase();
    if short_name.is_empty() || !short_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "organization short name must be non-empty and alphanumeric"})),
        )
            .into_response();
    }

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = match argon2.hash_password(payload.password.as_bytes(), &salt) {
        Ok(hash) => hash.to_string(),
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to hash password"})),
            )
                .into_response()
        }
    };

    let now = chrono::Utc::now().naive_utc();
    let org_id = Uuid::new_v4();

    let result = db
        .transaction::<_, user::Model, sea_orm::DbErr>(|txn| {
            let email = payload.email.clone();
            let name = payload.name.clone();
            let timezone = payload.timezone.clone().unwrap_or_else(|| "UTC".to_string());
            let short_name = short_name.clone();
            Box::pin(async move {
                organization::ActiveModel {
                    id: Set(org_id),
                    short_name: Set(short_name),
                    timezone: Set(timezone),
                    active: Set(true),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(txn)
                .await?;

                user::ActiveModel {
                    organization_id: Set(org_id),
                    email: Set(email),
                    password_hash: Set(password_hash),
                    name: Set(name),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await
            })
        })
        .await;

    match result {
        Ok(u) => {
            tracing::Span::current()
                .record("table", "users")
                .record("action", "register_user")
                .record("user_id", u.id)
                .record("user_email", &u.email)
                .record("business_event", "Organization registered");

            metrics::counter!("wildtrace_users_registered_total").increment(1);
            metrics::gauge!("wildtrace_organizations_total").increment(1.0);

            (
                StatusCode::CREATED,
                Json(json!({"id": u.id, "email": u.email, "organization_id": org_id})),
            )
                .into_response()
        }
        Err(e) => {
            let error_msg = e.to_string();
            if error_msg.contains("duplicate key value violates unique constraint") {
                return (
                    StatusCode::CONFLICT,
                    Json(json!({"error": "Email or organization short name already exists"})),
                )
                    .into_response();
            }

            tracing::Span::current()
                .record("table", "users")
                .record("action", "register_user_error")
                .record("error", display(&e));

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": error_msg})),
            )
                .into_response()
        }
    }
}

#[derive(serde::Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

pub async fn login(
    Extension(db): Extension<DatabaseConnection>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Response {
    let u = match user::Entity::find()
        .filter(user::Column::Email.eq(payload.email.clone()))
        .one(&db)
        .await
    {
        Ok(Some(u)) => u,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid email or password"})),
            )
                .into_response()
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    };

    let parsed_hash = match PasswordHash::new(&u.password_hash) {
        Ok(h) => h,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Invalid password hash in DB"})),
            )
                .into_response()
        }
    };

    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .is_ok()
    {
        let mut cookie = Cookie::new("wildtrace_user", u.id.to_string());
        cookie.set_path("/");
        cookie.set_http_only(true);
        cookies.add(cookie);

        tracing::Span::current()
            .record("table", "users")
            .record("action", "login_user")
            .record("user_id", u.id)
            .record("user_email", &u.email);

        (StatusCode::OK, Json(json!({"message": "Login successful"}))).into_response()
    } else {
        tracing::Span::current()
            .record("table", "users")
            .record("action", "login_user_failed")
            .record("error", "invalid_credentials");

        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid email or password"})),
        )
            .into_response()
    }
}
