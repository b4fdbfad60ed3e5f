//! Consultation endpoints: AI doctor, radiology and general health support.

use axum::extract::{Multipart, State};
use axum::Json;
use serde_json::Value;

use crate::api::endpoints::form::Form;
use crate::api::endpoints::{run_json, DEFAULT_LANGUAGE};
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::bridge::{Job, JobKind};

/// `POST /api/ai-doctor` — multipart `file`, optional `language`.
pub async fn ai_doctor(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let upload = form.take_file()?;
    let language = form.text_or("language", DEFAULT_LANGUAGE);

    run_json(&ctx, Job::new(JobKind::AiDoctor { language }), Some(upload)).await
}

/// `POST /api/radiology` — multipart `file`, optional `language`.
pub async fn radiology(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let upload = form.take_file()?;
    let language = form.text_or("language", DEFAULT_LANGUAGE);

    run_json(&ctx, Job::new(JobKind::Radiology { language }), Some(upload)).await
}

/// `POST /api/general-health-support` — multipart `symptoms`, optional
/// `language`. No file is involved.
pub async fn health_support(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = Form::read(multipart).await?;
    let symptoms = form.required_text("symptoms")?;
    let language = form.text_or("language", DEFAULT_LANGUAGE);

    run_json(
        &ctx,
        Job::new(JobKind::HealthSupport { symptoms, language }),
        None,
    )
    .await
}
