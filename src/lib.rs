pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::ConverterConfig;
use crate::services::conversion_service::ConversionService;
use crate::services::converter::KeyConverter;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Allowance for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::convert::convert_key,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::convert::ErrorResponse,
            api::handlers::convert::ErrorDetail,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "convert", description = "PuTTY to OpenSSH key conversion"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConverterConfig>,
    pub converter: Arc<dyn KeyConverter>,
    pub conversion_service: Arc<ConversionService>,
}

impl AppState {
    pub fn new(config: ConverterConfig, converter: Arc<dyn KeyConverter>) -> Self {
        let config = Arc::new(config);
        let conversion_service = Arc::new(ConversionService::new(
            config.clone(),
            converter.clone(),
        ));
        Self {
            config,
            converter,
            conversion_service,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.max_file_size_bytes() + MULTIPART_OVERHEAD;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/convert",
            post(api::handlers::convert::convert_key)
                .layer(axum::extract::DefaultBodyLimit::max(body_limit)),
        )
        .layer(from_fn(api::middleware::security::security_headers))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config))
        .with_state(state)
}

fn cors_layer(config: &ConverterConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        // The front-end reads the archive name from here
        .expose_headers([header::CONTENT_DISPOSITION])
}
