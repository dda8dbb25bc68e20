//! The [`EventRouter`] implementation the proxy engine is handed: every completed event goes
//! both into the in-process emitter and out to registered RPC subscribers, mirroring the
//! original's `ProxyManager.Publish`.

use std::sync::Arc;

use async_trait::async_trait;

use swarpf_emitter::{ApiEvent, Emitter};
use swarpf_proxy::EventRouter;

use crate::registry::Registry;

/// Fans an assembled event out to the in-process emitter and the RPC subscriber registry.
pub struct Publisher {
    registry: Arc<Registry>,
    emitter: Arc<Emitter>,
}

impl Publisher {
    /// Builds a publisher over a shared registry and emitter.
    pub fn new(registry: Arc<Registry>, emitter: Arc<Emitter>) -> Self {
        Self { registry, emitter }
    }
}

#[async_trait]
impl EventRouter for Publisher {
    async fn route(&self, event: ApiEvent) {
        let command = event.command.clone();
        self.emitter.emit(&command, event.clone()).await;
        self.registry.publish(&command, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn route_posts_into_the_emitter_under_the_command_topic() {
        let registry = Arc::new(Registry::new());
        let emitter = Arc::new(Emitter::new(1));
        let publisher = Publisher::new(registry, emitter.clone());

        let mut subscription = emitter.on("BattleDungeonStart");
        publisher
            .route(ApiEvent {
                command: "BattleDungeonStart".to_string(),
                request: "{}".to_string(),
                response: "{}".to_string(),
            })
            .await;

        let delivered = subscription.receiver.recv().await.expect("event delivered");
        assert_eq!(delivered.payload.command, "BattleDungeonStart");
    }
}
