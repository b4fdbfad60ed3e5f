//! Fake scripts for tests: `sh` stands in for the interpreter and each
//! script body is written where the job expects its script.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::bridge::job::ScriptRuntime;
use crate::bridge::InferenceBridge;
use crate::config::BridgeConfig;

pub struct Fixture {
    pub scripts: TempDir,
    pub staging: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            scripts: tempfile::tempdir().unwrap(),
            staging: tempfile::tempdir().unwrap(),
        }
    }

    /// Install `body` as the script at `relative` (see `Job::script`).
    pub fn script(&self, relative: &str, body: &str) -> &Self {
        let path = self.scripts.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
        self
    }

    pub fn bridge(&self, max_concurrent: usize) -> InferenceBridge {
        InferenceBridge::new(
            Arc::new(ScriptRuntime::new("sh", self.scripts.path())),
            self.staging.path(),
            max_concurrent,
        )
    }

    /// Config running scripts from this fixture through `sh`.
    pub fn config(&self, max_concurrent: usize) -> BridgeConfig {
        BridgeConfig {
            interpreter: "sh".into(),
            scripts_dir: self.scripts.path().to_path_buf(),
            staging_dir: self.staging.path().to_path_buf(),
            max_concurrent_processes: max_concurrent,
            ..BridgeConfig::default()
        }
    }

    /// Files currently left in the staging directory.
    pub fn staged_files(&self) -> usize {
        staged_files(self.staging.path())
    }
}

pub fn staged_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Poll `check` until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
