use crate::AppState;
use crate::api::error::AppError;
use crate::error::BridgeError;
use crate::models::PromoteJob;
use crate::services::records::Attacher;
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Deserialize, ToSchema, Validate)]
pub struct PromoteRequest {
    #[validate(length(min = 1, max = 255, message = "Record type is required"))]
    pub record_type: String,
    #[validate(length(min = 1, max = 255, message = "Record id is required"))]
    pub record_id: String,
    #[validate(length(min = 1, max = 255, message = "Attachment name is required"))]
    pub name: String,
}

#[derive(Serialize, ToSchema)]
pub struct PromoteResponse {
    pub status: String,
    pub file_id: String,
}

/// Queue the file currently attached as `name` for Lambda processing.
#[utoipa::path(
    post,
    path = "/lambda/promote",
    request_body = PromoteRequest,
    responses(
        (status = 202, description = "Promotion queued", body = PromoteResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Unknown record or no attached file")
    ),
    tag = "lambda"
)]
pub async fn promote(
    State(state): State<AppState>,
    Json(payload): Json<PromoteRequest>,
) -> Result<(StatusCode, Json<PromoteResponse>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let handle = state
        .authenticator
        .records()
        .find(&payload.record_type, &payload.record_id)
        .await?;
    let file = Attacher::new(handle, payload.name.clone())
        .file()?
        .ok_or_else(|| BridgeError::MissingAttachment(payload.name.clone()))?;

    let file_id = file.id.clone();
    state
        .jobs
        .send(PromoteJob {
            record_type: payload.record_type,
            record_id: payload.record_id,
            name: payload.name,
            file_data: file,
        })
        .await
        .map_err(|_| AppError::Internal("Promote queue is closed".to_string()))?;

    tracing::info!("📥 Queued promotion of {}", file_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(PromoteResponse {
            status: "queued".to_string(),
            file_id,
        }),
    ))
}
