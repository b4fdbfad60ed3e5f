//! Shared types for the API layer.

use std::sync::Arc;

use crate::bridge::InferenceBridge;
use crate::config::BridgeConfig;

/// Shared context for all API routes and middleware.
#[derive(Clone, Debug)]
pub struct ApiContext {
    pub bridge: Arc<InferenceBridge>,
    pub config: Arc<BridgeConfig>,
}

impl ApiContext {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            bridge: Arc::new(InferenceBridge::from_config(&config)),
            config: Arc::new(config),
        }
    }
}
