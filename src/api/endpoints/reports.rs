//! Lab report endpoints: inference on an uploaded report, and comparison
//! of two previous inferences.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::endpoints::form::Form;
use crate::api::endpoints::DEFAULT_LANGUAGE;
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::bridge::{BufferedOutput, ExtractedReport, Job, JobKind};

/// `POST /api/report-inference` — multipart `file` (PDF or image) plus
/// optional `language`. The script's text goes through the extractor.
pub async fn report_inference(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<ExtractedReport>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let upload = form.take_file()?;
    let language = form.text_or("language", DEFAULT_LANGUAGE);
    let job = Job::new(JobKind::ReportInference { language });

    match ctx.bridge.run_buffered(&job, Some(&upload)).await? {
        BufferedOutput::Report(report) => Ok(Json(report)),
        other => Err(ApiError::Internal(format!(
            "report inference produced {other:?}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareRequest {
    pub new_inference: Option<Value>,
    pub previous_inference: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub comparison: String,
}

/// `POST /api/compare-inference` — JSON `{newInference, previousInference}`.
///
/// Each inference may be an object or an already-serialized string; both
/// reach the script as one JSON-text argument.
pub async fn compare_inference(
    State(ctx): State<ApiContext>,
    payload: Result<Json<CompareRequest>, JsonRejection>,
) -> Result<Json<CompareResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let new_inference = inference_arg(req.new_inference, "newInference")?;
    let previous_inference = inference_arg(req.previous_inference, "previousInference")?;
    let job = Job::new(JobKind::CompareInference {
        new_inference,
        previous_inference,
    });

    match ctx.bridge.run_buffered(&job, None).await? {
        BufferedOutput::Text(comparison) => Ok(Json(CompareResponse { comparison })),
        other => Err(ApiError::Internal(format!(
            "compare inference produced {other:?}"
        ))),
    }
}

fn inference_arg(value: Option<Value>, name: &str) -> Result<String, ApiError> {
    match value {
        None | Some(Value::Null) => Err(ApiError::BadRequest(format!("{name} is required"))),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ApiError::BadRequest(format!("{name} is required")))
        }
        Some(Value::String(s)) => Ok(s),
        Some(other) => Ok(other.to_string()),
    }
}
