//! HTTP surface: the client protocol handler (§4.6), the query/read API
//! (§4.7), the feed, and the admin mutation endpoints the rest of the
//! spec presupposes.

pub mod admin;
pub mod client;
pub mod feed;
pub mod query;

use axum::http::HeaderValue;
use axum::routing::{get, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(allowed))
}

pub fn router(state: AppState) -> Router {
    let client_protocol = Router::new()
        .route("/api/0/crab/:host", put(client::register_no_id).get(client::get_no_id))
        .route("/api/0/crab/:host/:id", put(client::register_with_id).get(client::get_with_id))
        .route("/api/0/crab/:host/start", put(client::start_no_id))
        .route("/api/0/crab/:host/:id/start", put(client::start_with_id))
        .route("/api/0/crab/:host/finish", put(client::finish_no_id))
        .route("/api/0/crab/:host/:id/finish", put(client::finish_with_id))
        .route("/api/0/crab/:host/event", put(client::report_no_id))
        .route("/api/0/crab/:host/:id/event", put(client::report_with_id));

    let read_api = Router::new()
        .route("/api/0/jobs", get(query::list_jobs))
        .route("/api/0/jobs/:id", get(query::get_job))
        .route("/api/0/jobs/:id/events", get(query::get_job_events))
        .route("/feed.rss", get(feed::feed));

    let admin_api = Router::new()
        .route("/api/0/jobs/:id/schedule", axum::routing::post(admin::set_schedule))
        .route("/api/0/jobs/:id/retire", axum::routing::post(admin::retire_job))
        .route(
            "/api/0/jobs/:id/inhibit",
            axum::routing::post(admin::set_inhibit).delete(admin::clear_inhibit),
        )
        .route(
            "/api/0/notifications",
            get(admin::get_notifications).put(admin::put_notifications),
        );

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    let mut app = Router::new()
        .merge(client_protocol)
        .merge(read_api)
        .merge(admin_api);

    // The web UI always renders, even without a templating
    // layer of our own: serve whatever static assets `crab.home` holds.
    // A fallback, not a nested route — axum 0.7 refuses to nest a
    // service at the root path.
    if state.config.crab.home.is_dir() {
        app = app.fallback_service(ServeDir::new(&state.config.crab.home));
    }

    app.route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
