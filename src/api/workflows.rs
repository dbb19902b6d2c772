//! Workflow upload and registration status endpoints

use axum::{
    Json,
    extract::{Multipart, Query, State},
};
use serde::Deserialize;

use super::dto::{RegistrationDescriptor, UploadWorkflowResponse};
use crate::AppState;
use crate::auth::CurrentSession;
use crate::error::AppError;
use crate::service::WorkflowService;

/// POST workflows-v2 (multipart field `file`)
pub async fn upload_workflow(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    mut multipart: Multipart,
) -> Result<Json<UploadWorkflowResponse>, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidFile(format!("Failed to parse multipart: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(ToString::to_string)
            .ok_or_else(|| AppError::InvalidFile("Uploaded file has no name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidFile(format!("Failed to read upload: {e}")))?;
        upload = Some((file_name, bytes.to_vec()));
    }

    let (file_name, content) =
        upload.ok_or_else(|| AppError::InvalidFile("Missing 'file' field".to_string()))?;

    let service = WorkflowService::new(
        &state.github_app,
        &state.config.github,
        state.config.upload.max_file_bytes,
    );
    let response = service.upload(&session, &file_name, &content).await?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    filename: Option<String>,
}

/// GET workflows-v2?filename=
///
/// Responds 404 until GitHub has created the registration run.
pub async fn registration_status(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Query(query): Query<StatusQuery>,
) -> Result<Json<RegistrationDescriptor>, AppError> {
    let file_name = query
        .filename
        .ok_or_else(|| AppError::Validation("filename query parameter is required".to_string()))?;

    let service = WorkflowService::new(
        &state.github_app,
        &state.config.github,
        state.config.upload.max_file_bytes,
    );

    Ok(Json(service.registration_status(&session, &file_name).await?))
}
