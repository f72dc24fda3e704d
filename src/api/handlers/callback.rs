use crate::AppState;
use crate::api::error::AppError;
use crate::services::authenticator::Authorized;
use crate::services::result_writer::ResultWriter;
use axum::{Json, extract::State, http::HeaderMap};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct CallbackResponse {
    pub status: String,
}

/// Receives a processing result from a Lambda function. The request must be
/// signed (AWS SigV4) with the secret issued for the attachment at dispatch.
#[utoipa::path(
    put,
    path = "/lambda/callback",
    request_body(content = String, description = "Lambda result JSON with its context block", content_type = "application/json"),
    responses(
        (status = 200, description = "Result stored", body = CallbackResponse),
        (status = 400, description = "Authentic but malformed result"),
        (status = 401, description = "Signature did not match")
    ),
    tag = "lambda"
)]
pub async fn lambda_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<CallbackResponse>, AppError> {
    let Some(Authorized { mut attacher, result }) = state.authenticator.authorize(&headers, &body).await
    else {
        return Err(AppError::Unauthorized("Invalid callback signature".to_string()));
    };

    ResultWriter::apply_result(&mut attacher, result).await?;

    Ok(Json(CallbackResponse {
        status: "ok".to_string(),
    }))
}
