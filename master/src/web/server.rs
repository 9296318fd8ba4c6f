//! Router assembly and HTTP plumbing.

use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // === AGENTS ===
        .route("/api/v1/agents/register", post(handlers::agents::register))
        .route("/api/v1/agents/heartbeat", post(handlers::agents::heartbeat))
        .route("/api/v1/agents", get(handlers::agents::list))
        .route("/api/v1/agents/{id}", get(handlers::agents::get))
        .route("/api/v1/agents/{id}", delete(handlers::agents::remove))
        .route(
            "/api/v1/agents/{id}/tasks/pull",
            get(handlers::tasks::pull),
        )
        // === TASKS ===
        .route("/api/v1/tasks", post(handlers::tasks::create))
        .route("/api/v1/tasks", get(handlers::tasks::list))
        .route("/api/v1/tasks/{id}", get(handlers::tasks::get))
        .route("/api/v1/tasks/{id}/dispatch", post(handlers::tasks::dispatch))
        .route("/api/v1/tasks/{id}/stop", post(handlers::tasks::stop))
        .route(
            "/api/v1/tasks/{id}/metrics",
            post(handlers::tasks::report_metrics),
        )
        .route(
            "/api/v1/tasks/{id}/metrics",
            get(handlers::tasks::get_metrics),
        )
        // === TRAFFIC PROFILES ===
        .route(
            "/api/v1/traffic-profiles",
            post(handlers::profiles::create),
        )
        .route("/api/v1/traffic-profiles", get(handlers::profiles::list))
        .route(
            "/api/v1/traffic-profiles/{id}",
            get(handlers::profiles::get),
        )
        // === PROVISIONING ===
        .route(
            "/api/v1/agents/provision",
            post(handlers::provision::start),
        )
        .route(
            "/api/v1/agents/provision-jobs",
            get(handlers::provision::list_jobs),
        )
        .route(
            "/api/v1/agents/provision-jobs/{job_id}",
            get(handlers::provision::get_job),
        )
        .route(
            "/api/v1/agents/provision-jobs/{job_id}",
            delete(handlers::provision::delete_job),
        )
        .route(
            "/api/v1/agents/provision-jobs/{job_id}/retry",
            post(handlers::provision::retry_job),
        )
        // === CREDENTIALS ===
        .route(
            "/api/v1/credentials",
            post(handlers::provision::create_credential),
        )
        .route(
            "/api/v1/credentials",
            get(handlers::provision::list_credentials),
        )
        .route(
            "/api/v1/credentials/{id}",
            delete(handlers::provision::delete_credential),
        )
        // === DASHBOARD ===
        .route(
            "/api/v1/dashboard/overview",
            get(handlers::dashboard::overview),
        )
        .route(
            "/api/v1/dashboard/bandwidth/history",
            get(handlers::dashboard::bandwidth_history),
        )
        // === HEALTH + METRICS ===
        .route("/healthz", get(handlers::dashboard::healthz))
        .route("/metrics", get(handlers::dashboard::prometheus_metrics))
        .layer(middleware::from_fn(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Allow-any CORS; preflight requests are answered directly with 204.
async fn cors(req: Request, next: Next) -> Response {
    let preflight = req.method() == Method::OPTIONS;
    let mut response = if preflight {
        let mut res = Response::new(Default::default());
        *res.status_mut() = StatusCode::NO_CONTENT;
        res
    } else {
        next.run(req).await
    };
    let headers = response.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}
