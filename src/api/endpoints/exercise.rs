//! Exercise analysis endpoints.
//!
//! `/exercise` buffers one JSON verdict; `/exercise/video` and
//! `/exercise/stream` relay per-frame NDJSON as server-sent events.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::api::endpoints::form::Form;
use crate::api::endpoints::run_json;
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::bridge::{Job, JobKind, RelaySession};

const DEFAULT_LIVE_EXERCISE: &str = "Bench Press";

/// `POST /api/exercise` — multipart `exercise_type` and `file`.
pub async fn analyze(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut form = Form::read(multipart).await?;
    let exercise_type = form.required_text("exercise_type")?;
    let upload = form.take_file()?;

    run_json(
        &ctx,
        Job::new(JobKind::ExerciseAnalysis { exercise_type }),
        Some(upload),
    )
    .await
}

/// `POST /api/exercise/video` — multipart `exercise_type` and `file`;
/// responds with an SSE stream of the script's progress lines.
pub async fn video(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<RelaySession, ApiError> {
    let mut form = Form::read(multipart).await?;
    let exercise_type = form.required_text("exercise_type")?;
    let upload = form.take_file()?;

    let job = Job::new(JobKind::ExerciseVideo { exercise_type });
    Ok(ctx.bridge.run_streaming(&job, Some(&upload)).await?)
}

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    pub exercise_type: Option<String>,
}

/// `GET /api/exercise/stream?exercise_type=` — live analysis from the
/// script's own camera input.
pub async fn live(
    State(ctx): State<ApiContext>,
    Query(query): Query<LiveQuery>,
) -> Result<RelaySession, ApiError> {
    let exercise_type = query
        .exercise_type
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_LIVE_EXERCISE.to_string());

    let job = Job::new(JobKind::ExerciseLive { exercise_type });
    Ok(ctx.bridge.run_streaming(&job, None).await?)
}
