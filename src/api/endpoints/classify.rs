//! Image classification endpoint.

use axum::extract::{Multipart, State};
use axum::Json;
use serde_json::Value;

use crate::api::endpoints::form::Form;
use crate::api::endpoints::run_json;
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::bridge::{Job, JobKind};

const DEFAULT_MODEL_TYPE: &str = "brain";

/// `POST /api/classify` — multipart `file` plus optional `modelType`.
pub async fn classify(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let upload = form.take_file()?;
    let model_type = form.text_or("modelType", DEFAULT_MODEL_TYPE);

    run_json(&ctx, Job::new(JobKind::Classify { model_type }), Some(upload)).await
}
