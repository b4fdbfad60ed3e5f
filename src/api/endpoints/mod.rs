//! API endpoint handlers.
//!
//! Each module covers one family of inference scripts. Handlers only
//! validate and shape input; all process work goes through the bridge.

pub mod classify;
pub mod consult;
pub mod exercise;
pub mod form;
pub mod health;
pub mod reports;

use axum::Json;
use serde_json::Value;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::bridge::{BufferedOutput, Job, Upload};

/// Language passed to scripts when the client sends none.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Run a JSON-contract job and return the script's value unchanged.
pub(crate) async fn run_json(
    ctx: &ApiContext,
    job: Job,
    upload: Option<Upload>,
) -> Result<Json<Value>, ApiError> {
    match ctx.bridge.run_buffered(&job, upload.as_ref()).await? {
        BufferedOutput::Json(value) => Ok(Json(value)),
        other => Err(ApiError::Internal(format!(
            "{} produced {other:?} instead of JSON",
            job.name()
        ))),
    }
}
