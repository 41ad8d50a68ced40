//! API module providing the HTTP endpoints.
//!
//! This module is organized into submodules:
//! - `resources` - Tracked resource endpoints (/api/resources/*)
//! - `subscriptions` - Subscription management endpoints (/api/subscriptions, /api/subscribers/*)
//! - `health` - Health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod health;
pub mod openapi;
pub mod resources;
pub mod subscriptions;

pub use health::MISC_TAG;
pub use resources::RESOURCES_TAG;
pub use subscriptions::SUBSCRIPTIONS_TAG;

use crate::AppResources;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(app_resources))]
pub async fn start_webserver(app_resources: AppResources) -> color_eyre::Result<()> {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/api", resources::router().merge(subscriptions::router()))
        .routes(routes!(health::health))
        .layer(axum::Extension(app_resources))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    let router = router.merge(Redoc::with_url("/api-docs", api));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info_span!("Server running", addr = "0.0.0.0:8080");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
