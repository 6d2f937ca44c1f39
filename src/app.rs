//! HTTP surface: router, handlers and server lifecycle.

use crate::models::{Config, HealthBody};
use crate::relay::{Relay, RelayResult};
use crate::upload::read_multipart;
use crate::upstream::{mime, TryOnClient, TryOnService};
use crate::{Error, Result};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use url::Url;

pub const DOWNLOAD_ROUTE: &str = "/api/download-image";
pub const HEALTH_ROUTE: &str = "/health";

/// Injectable collaborators used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub upstream: Arc<dyn TryOnService>,
}

#[derive(Clone)]
pub struct AppState {
    relay: Arc<Relay>,
    upstream: Arc<dyn TryOnService>,
    storage_public_url: Option<Arc<Url>>,
}

/// The relay service wired to its upstream client and configuration.
pub struct App {
    config: Config,
    state: AppState,
}

impl App {
    /// Construct an app from environment configuration (`Config::from_env`).
    pub fn new() -> Result<Self> {
        Ok(Self::from_config(Config::from_env()?))
    }

    pub fn from_config(config: Config) -> Self {
        let upstream = TryOnClient::new(config.relay.timeout);
        Self::with_services(
            AppServices {
                upstream: Arc::new(upstream),
            },
            config,
        )
    }

    /// Build an app from concrete service dependencies.
    pub fn with_services(services: AppServices, config: Config) -> Self {
        let relay = Relay::new(config.relay.clone(), services.upstream.clone());
        let state = AppState {
            relay: Arc::new(relay),
            upstream: services.upstream,
            storage_public_url: config.storage_public_url.clone().map(Arc::new),
        };

        Self { config, state }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE])
            .max_age(Duration::from_secs(60 * 60));

        Router::new()
            .route(
                &self.config.relay.route,
                post(relay_handler).layer(DefaultBodyLimit::disable()),
            )
            .route(DOWNLOAD_ROUTE, get(download_image_handler))
            .route(HEALTH_ROUTE, get(health_handler))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_address).await?;
        info!(
            "Relay listening on {} ({} -> {})",
            self.config.bind_address, self.config.relay.route, self.config.relay.upstream_url
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Relay shut down");
        Ok(())
    }
}

async fn relay_handler(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<RelayResult> {
    let mut multipart = multipart.map_err(|e| {
        debug!("Rejected non-multipart relay request: {}", e);
        Error::ClientInput("Invalid content-type: expected multipart/form-data".to_string())
    })?;

    let upload = read_multipart(&mut multipart, state.relay.config()).await?;
    state.relay.relay(upload).await
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    url: Option<String>,
}

/// Same origin as `base`, and a path below it. The base path is treated as
/// a directory so `/public` does not admit `/publicity`.
fn is_within(url: &Url, base: &Url) -> bool {
    let mut prefix = base.path().to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }

    url.scheme() == base.scheme()
        && url.host_str() == base.host_str()
        && url.port_or_known_default() == base.port_or_known_default()
        && url.path().starts_with(&prefix)
}

async fn download_image_handler(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    let raw = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::ClientInput("Image URL is required".to_string()))?;

    let base = state
        .storage_public_url
        .as_deref()
        .ok_or_else(|| Error::ClientInput("Image downloads are not configured".to_string()))?;

    let url = Url::parse(raw.trim())
        .map_err(|e| Error::ClientInput(format!("Invalid image URL '{}': {}", raw, e)))?;
    if !is_within(&url, base) {
        warn!("Refusing to proxy image outside storage: {}", url);
        return Err(Error::ClientInput(format!(
            "Image URL must be under {}",
            base
        )));
    }

    let reply = state.upstream.fetch_image(&url).await?;
    if !reply.status.is_success() {
        return Err(Error::UpstreamRejected {
            status: reply.status,
            body: reply.body_excerpt(),
        });
    }

    let content_type = reply
        .content_type
        .clone()
        .filter(|ct| !ct.trim().is_empty())
        .or_else(|| mime::sniff_image_mime(&reply.body).map(str::to_string))
        .unwrap_or_else(|| mime::OCTET_STREAM.to_string());

    let file_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("image")
        .replace('"', "_");

    debug!("Proxying {} ({} bytes, {})", url, reply.body.len(), content_type);

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_DISPOSITION, format!("inline; filename=\"{}\"", file_name)),
            (
                CACHE_CONTROL,
                "public, max-age=31536000, immutable".to_string(),
            ),
        ],
        reply.body,
    )
        .into_response())
}

async fn health_handler() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok".to_string(),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
