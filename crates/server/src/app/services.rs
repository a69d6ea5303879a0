use std::sync::Arc;

use hive_auth::{Authenticator, Authorizer, PasswordHasher, TokenService};
use hive_infra::backplane::{Backplane, BackplaneError, RealtimeMessage};
use hive_infra::store::StoreConnection;

use crate::realtime::RealtimeHub;

/// Everything a request handler needs, shared across requests of one worker.
pub struct AppServices {
    pub store: Arc<dyn StoreConnection>,
    pub authorizer: Authorizer<dyn StoreConnection>,
    pub authenticator: Authenticator<dyn StoreConnection>,
    pub tokens: TokenService,
    pub backplane: Arc<dyn Backplane>,
    pub realtime: Arc<RealtimeHub>,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn StoreConnection>,
        backplane: Arc<dyn Backplane>,
        realtime: Arc<RealtimeHub>,
        tokens: TokenService,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            authorizer: Authorizer::new(Arc::clone(&store)),
            authenticator: Authenticator::new(Arc::clone(&store), hasher),
            store,
            tokens,
            backplane,
            realtime,
        }
    }

    /// Publish on the backplane without blocking the async runtime.
    pub async fn publish(&self, message: RealtimeMessage) -> Result<(), BackplaneError> {
        let backplane = Arc::clone(&self.backplane);
        tokio::task::spawn_blocking(move || backplane.publish(&message))
            .await
            .map_err(|e| BackplaneError::Command(format!("publish task failed: {e}")))?
    }

    /// Publish, logging instead of failing: notifications are best-effort.
    pub async fn notify(&self, topic: &str, payload: serde_json::Value) {
        if let Err(e) = self.publish(RealtimeMessage::new(topic, payload)).await {
            tracing::warn!(error = %e, topic, "realtime notification dropped");
        }
    }
}
