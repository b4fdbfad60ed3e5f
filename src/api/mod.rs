//! HTTP front for the inference bridge.
//!
//! Routes are nested under `/api/`. Buffered endpoints answer with JSON,
//! streaming endpoints with server-sent events. Errors share one envelope:
//! `{"error": {"code", "message"}}`.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::bridge_router;
pub use server::{BridgeServer, BridgeSession};
pub use types::ApiContext;
