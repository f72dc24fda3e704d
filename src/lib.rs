pub mod api;
pub mod config;
pub mod entities;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::LambdaConfig;
use crate::models::PromoteJob;
use crate::services::authenticator::CallbackAuthenticator;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::callback::lambda_callback,
        api::handlers::promote::promote,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::callback::CallbackResponse,
            api::handlers::promote::PromoteRequest,
            api::handlers::promote::PromoteResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "lambda", description = "Lambda dispatch and callback endpoints"),
        (name = "system", description = "System endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<LambdaConfig>,
    pub authenticator: CallbackAuthenticator,
    pub jobs: mpsc::Sender<PromoteJob>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/lambda/callback", put(api::handlers::callback::lambda_callback))
        .route("/lambda/promote", post(api::handlers::promote::promote))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
