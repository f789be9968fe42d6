use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use sea_orm::{Database, DatabaseConnection};
use wildtrace_server::config::OutputSettings;
use wildtrace_server::outputs::{DbConnectionStore, OutputReconciler};
use wildtrace_server::ports::{ArcgisClient, HttpScheduler, MappingPort, SchedulingPort};
use wildtrace_server::{api, migrator};

#[tokio::main]
async fn main() {
    // Load .env if present (dotenvy)
    dotenvy::dotenv().ok();

    wildtrace_server::telemetry::init_telemetry("wildtrace-server");

    let (prometheus_layer, metric_handle) = axum_prometheus::PrometheusMetricLayer::pair();

    // Database Connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    use sea_orm_migration::MigratorTrait;
    migrator::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    wildtrace_server::metrics::init_metrics(&db).await;

    // Capability ports and the reconciler built on top of them
    let scheduling: Arc<dyn SchedulingPort> = Arc::new(HttpScheduler::new());
    let mapping: Arc<dyn MappingPort> = Arc::new(ArcgisClient::new());
    let reconciler = Arc::new(OutputReconciler::new(
        scheduling,
        mapping.clone(),
        Arc::new(DbConnectionStore::new(db.clone())),
        OutputSettings::from_env(),
    ));

    let app = app(db, reconciler, mapping, prometheus_layer, metric_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8000));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> &'static str {
    "OK"
}

fn app(
    db: DatabaseConnection,
    reconciler: Arc<OutputReconciler>,
    mapping: Arc<dyn MappingPort>,
    prometheus_layer: axum_prometheus::PrometheusMetricLayer<'static>,
    metric_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(api::auth::register))
        .route("/login", post(api::auth::login));

    let protected_routes = Router::new()
        .route(
            "/source-accounts",
            get(api::source_account::list_source_accounts)
                .post(api::source_account::create_source_account),
        )
        .route(
            "/source-accounts/:id",
            get(api::source_account::get_source_account)
                .patch(api::source_account::update_source_account)
                .delete(api::source_account::delete_source_account),
        )
        .route(
            "/source-accounts/:id/connections",
            get(api::connection::list_source_connections),
        )
        .route("/connections", get(api::connection::list_connections))
        .route(
            "/mapping-accounts",
            get(api::mapping_account::list_mapping_accounts)
                .post(api::mapping_account::create_mapping_account),
        )
        .route(
            "/mapping-accounts/:id",
            axum::routing::delete(api::mapping_account::delete_mapping_account),
        )
        .route(
            "/mapping-accounts/:id/verify",
            post(api::mapping_account::verify_mapping_account),
        )
        .route_layer(axum::middleware::from_fn(api::middleware::auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(auth_routes)
        .merge(protected_routes)
        .layer(Extension(db))
        .layer(Extension(reconciler))
        .layer(Extension(mapping))
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(prometheus_layer)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<axum::body::Body>| {
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched| matched.as_str());

                    // Dynamic Span Name: "METHOD /path" (e.g., "POST /login")
                    let span_name = if let Some(path) = matched_path {
                        format!("{} {}", request.method(), path)
                    } else {
                        format!("{} {}", request.method(), request.uri().path())
                    };

                    let user_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .or_else(|| {
                            request
                                .headers()
                                .get("x-real-ip")
                                .and_then(|v| v.to_str().ok())
                        })
                        .unwrap_or("unknown");

                    // Create span with explicit fields for handlers to fill in later
                    tracing::info_span!(
                        "request",
                        "otel.name" = span_name,
                        user_ip = user_ip,
                        method = ?request.method(),
                        uri = ?request.uri(),
                        table = tracing::field::Empty,
                        action = tracing::field::Empty,
                        user_id = tracing::field::Empty,
                        user_email = tracing::field::Empty,
                        business_event = tracing::field::Empty,
                        error = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency = tracing::field::Empty,
                    )
                })
                .on_request(
                    |_request: &axum::http::Request<axum::body::Body>, _span: &tracing::Span| {
                        // Disable default "started processing request" log to reduce noise
                    },
                )
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record("status", tracing::field::display(response.status()));
                        span.record("latency", tracing::field::debug(latency));

                        tracing::info!("request completed");
                    },
                ),
        )
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(
                    std::env::var("CORS_ALLOW_ORIGIN")
                        .unwrap_or_else(|_| "http://localhost:3003".to_string())
                        .parse::<axum::http::HeaderValue>()
                        .unwrap(),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                ])
                .allow_headers([axum::http::header::CONTENT_TYPE])
                .allow_credentials(true),
        )
        .route("/metrics", get(|| async move { metric_handle.render() }))
}
