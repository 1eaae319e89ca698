//! Application state for the gateway service.

use std::sync::Arc;

use common::config::AppConfig;

use crate::registry::SessionRegistry;
use crate::service::GatewayService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    /// Creates a new application state with an empty session registry.
    pub fn new(config: AppConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(config.clone())),
            config,
        }
    }

    /// Gateway service bound to this state's registry.
    pub fn gateway(&self) -> GatewayService {
        GatewayService::new(self.registry.clone(), self.config.operation_timeout())
    }
}
