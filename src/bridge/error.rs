use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the inference bridge.
///
/// `BadInput` is raised before anything is allocated. Every other variant
/// happens after staging, so the caller's artifact is still released.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid input: {0}")]
    BadInput(String),

    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Script failed ({}): {stderr}", exit_label(.exit_code))]
    ScriptFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{job} did not finish within {}s", .limit.as_secs())]
    Timeout { job: &'static str, limit: Duration },

    #[error("Could not parse script output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to delete {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
