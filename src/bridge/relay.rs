//! Stream relay: script stdout lines → server-sent events.
//!
//! A `RelaySession` owns everything a streaming request holds: the
//! running script, the staged upload and the admission permit. When stdout
//! ends the child is reaped and the session is dropped, which releases the
//! upload. If the client goes away first, axum drops the body stream; the
//! session then kills and reaps the child before releasing the upload.

use std::convert::Infallible;

use axum::http::{header, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, Stream};
use tokio::sync::OwnedSemaphorePermit;

use crate::bridge::invoker::OutputLines;
use crate::bridge::staging::{release_quietly, TemporaryArtifact};

/// Resources held for the lifetime of one streaming response.
#[derive(Debug)]
pub struct RelaySession {
    job: &'static str,
    lines: Option<OutputLines>,
    artifact: Option<TemporaryArtifact>,
    permit: Option<OwnedSemaphorePermit>,
    frames: usize,
}

impl RelaySession {
    pub fn new(
        job: &'static str,
        lines: OutputLines,
        artifact: Option<TemporaryArtifact>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            job,
            lines: Some(lines),
            artifact,
            permit,
            frames: 0,
        }
    }

    /// Next SSE payload. Blank lines are skipped; `None` once stdout closes.
    pub async fn next_payload(&mut self) -> Option<String> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = lines.next_line().await?;
            // SSE fields cannot carry carriage returns.
            let payload = line.replace('\r', "");
            if payload.trim().is_empty() {
                continue;
            }
            self.frames += 1;
            return Some(payload);
        }
    }

    /// Lazy, single-pass stream of SSE events.
    pub fn into_events(self) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
        stream::unfold(self, |mut session| async move {
            let payload = session.next_payload().await?;
            Some((Ok(Event::default().data(payload)), session))
        })
    }
}

impl IntoResponse for RelaySession {
    /// SSE response: `text/event-stream`, no caching, connection kept open.
    fn into_response(self) -> Response {
        let mut response = Sse::new(self.into_events())
            .keep_alive(KeepAlive::default())
            .into_response();

        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        // Reverse proxies must not hold frames back.
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        response
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        let artifact = self.artifact.take();
        let permit = self.permit.take();

        match self.lines.take() {
            Some(mut lines) if lines.is_running() => {
                tracing::info!(
                    job = self.job,
                    frames = self.frames,
                    "Stream closed before script finished; stopping it"
                );
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        // The upload must outlive the script that reads it.
                        handle.spawn(async move {
                            lines.terminate().await;
                            release_quietly(artifact);
                            drop(permit);
                        });
                    }
                    Err(_) => {
                        // No runtime left: kill_on_drop is all we can do.
                        drop(lines);
                        release_quietly(artifact);
                    }
                }
            }
            lines => {
                tracing::info!(
                    job = self.job,
                    frames = self.frames,
                    status = ?lines.as_ref().map(|l| l.status()),
                    "Stream finished"
                );
                release_quietly(artifact);
            }
        }
    }
}
