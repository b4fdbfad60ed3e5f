//! Job model: which script runs, with which positional arguments, in which mode.
//!
//! A `Job` is a description only. A `Runtime` turns it into a concrete
//! `Invocation`, so nothing above this module knows which interpreter or
//! script layout is in use.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::bridge::error::BridgeError;

/// How the script's output reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Collect all output, then respond once.
    Buffered,
    /// Forward stdout lines as they are produced.
    Streaming,
}

/// How buffered stdout is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputContract {
    /// Exactly one JSON value.
    Json,
    /// Free text, trimmed.
    Text,
    /// Lab report text, run through the text extractor.
    Report,
    /// Newline-delimited JSON fragments, relayed verbatim.
    Lines,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Classify { model_type: String },
    ReportInference { language: String },
    CompareInference {
        new_inference: String,
        previous_inference: String,
    },
    AiDoctor { language: String },
    Radiology { language: String },
    HealthSupport { symptoms: String, language: String },
    ExerciseAnalysis { exercise_type: String },
    ExerciseVideo { exercise_type: String },
    ExerciseLive { exercise_type: String },
}

/// A unit of work for the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub kind: JobKind,
    pub mode: Mode,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        let mode = kind.mode();
        Self { kind, mode }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self.kind {
            JobKind::Classify { .. } => "classify",
            JobKind::ReportInference { .. } => "report_inference",
            JobKind::CompareInference { .. } => "compare_inference",
            JobKind::AiDoctor { .. } => "ai_doctor",
            JobKind::Radiology { .. } => "radiology",
            JobKind::HealthSupport { .. } => "health_support",
            JobKind::ExerciseAnalysis { .. } => "exercise_analysis",
            JobKind::ExerciseVideo { .. } => "exercise_video",
            JobKind::ExerciseLive { .. } => "exercise_live",
        }
    }

    /// Script path relative to the scripts directory.
    pub fn script(&self) -> &'static str {
        match self.kind {
            JobKind::Classify { .. } => "classifier/classifier.py",
            JobKind::ReportInference { .. } => "report-inference/report-inference.py",
            JobKind::CompareInference { .. } => "report-inference/compare_inference.py",
            JobKind::AiDoctor { .. } => "ai-doctor/ai_doctor.py",
            JobKind::Radiology { .. } => "radiology/radiology.py",
            JobKind::HealthSupport { .. } => "general-health-support/general_health_support.py",
            JobKind::ExerciseAnalysis { .. } => "exercise/exercise.py",
            JobKind::ExerciseVideo { .. } | JobKind::ExerciseLive { .. } => {
                "exercise/exercise_stream.py"
            }
        }
    }

    pub fn contract(&self) -> OutputContract {
        match self.kind {
            JobKind::ReportInference { .. } => OutputContract::Report,
            JobKind::CompareInference { .. } => OutputContract::Text,
            JobKind::ExerciseVideo { .. } | JobKind::ExerciseLive { .. } => OutputContract::Lines,
            _ => OutputContract::Json,
        }
    }

    /// Whether the script reads a staged upload.
    pub fn needs_upload(&self) -> bool {
        !matches!(
            self.kind,
            JobKind::CompareInference { .. }
                | JobKind::HealthSupport { .. }
                | JobKind::ExerciseLive { .. }
        )
    }

    /// Extension used when the upload's file name carries none.
    pub fn default_extension(&self) -> &'static str {
        match self.kind {
            JobKind::ReportInference { .. } => ".pdf",
            _ => "",
        }
    }

    /// Positional arguments after the script path.
    ///
    /// `input` is the staged upload, required by jobs that read one.
    pub fn args(&self, input: Option<&Path>) -> Result<Vec<OsString>, BridgeError> {
        let input = || -> Result<OsString, BridgeError> {
            input
                .map(|p| p.as_os_str().to_os_string())
                .ok_or_else(|| BridgeError::BadInput(format!("{} requires a file", self.name())))
        };

        let args = match &self.kind {
            JobKind::Classify { model_type } => vec![input()?, model_type.into()],
            JobKind::ReportInference { language }
            | JobKind::AiDoctor { language }
            | JobKind::Radiology { language } => vec![input()?, language.into()],
            JobKind::CompareInference {
                new_inference,
                previous_inference,
            } => vec![new_inference.into(), previous_inference.into()],
            JobKind::HealthSupport { symptoms, language } => {
                vec![symptoms.into(), language.into()]
            }
            JobKind::ExerciseAnalysis { exercise_type }
            | JobKind::ExerciseVideo { exercise_type } => vec![exercise_type.into(), input()?],
            JobKind::ExerciseLive { exercise_type } => vec![exercise_type.into()],
        };
        Ok(args)
    }
}

impl JobKind {
    fn mode(&self) -> Mode {
        match self {
            JobKind::ExerciseVideo { .. } | JobKind::ExerciseLive { .. } => Mode::Streaming,
            _ => Mode::Buffered,
        }
    }
}

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

/// Maps jobs onto an external runtime.
pub trait Runtime: Send + Sync {
    fn invocation(&self, job: &Job, input: Option<&Path>) -> Result<Invocation, BridgeError>;
}

/// Runs each job as `<interpreter> <scripts_dir>/<script> <args...>`.
#[derive(Debug, Clone)]
pub struct ScriptRuntime {
    pub interpreter: PathBuf,
    pub scripts_dir: PathBuf,
}

impl ScriptRuntime {
    pub fn new(interpreter: impl Into<PathBuf>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            scripts_dir: scripts_dir.into(),
        }
    }
}

impl Runtime for ScriptRuntime {
    fn invocation(&self, job: &Job, input: Option<&Path>) -> Result<Invocation, BridgeError> {
        let mut args = Vec::with_capacity(4);
        args.push(self.scripts_dir.join(job.script()).into_os_string());
        args.extend(job.args(input)?);
        Ok(Invocation {
            program: self.interpreter.clone(),
            args,
        })
    }
}
