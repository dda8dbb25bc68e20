//! The subscriber registry: `Register`/`Disconnect` bookkeeping and glob-matched publication.
//!
//! A single async mutex guards the map, mirroring the emitter's listener map but held across
//! the registration dial: registration is cold-path compared to publication, so serializing
//! it is an acceptable trade for never racing two `Register`s of the same address. Publication
//! takes a snapshot under the lock and releases it before issuing any RPC call, exactly like
//! `swarpf_emitter::Emitter::emit`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};

use swarpf_emitter::ApiEvent;
use swarpf_rpc::proxyapi::proxy_api_consumer_client::ProxyApiConsumerClient;

use crate::error::RegistryError;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct SubscriberEntry {
    commands: Vec<String>,
    client: ProxyApiConsumerClient<Channel>,
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    globset::Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(candidate))
        .unwrap_or(false)
}

/// Holds every currently-registered subscriber, keyed by its listen address.
#[derive(Default)]
pub struct Registry {
    subscribers: Mutex<HashMap<String, SubscriberEntry>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a subscriber at `address` for the glob patterns in `commands`, dialing its
    /// consumer service with a 5-second bound. Fails without side effects if `address` is
    /// already registered.
    pub async fn register(&self, address: String, commands: Vec<String>) -> Result<(), RegistryError> {
        let mut guard = self.subscribers.lock().await;
        if guard.contains_key(&address) {
            return Err(RegistryError::AlreadyRegistered(address));
        }

        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| RegistryError::InvalidAddress(address.clone(), e))?
            .connect_timeout(DIAL_TIMEOUT);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| RegistryError::DialFailed(address.clone(), e))?;
        let client = ProxyApiConsumerClient::new(channel);

        guard.insert(address, SubscriberEntry { commands, client });
        Ok(())
    }

    /// Removes the subscriber at `address`, if present, closing its RPC channel by dropping
    /// the last handle to it.
    pub async fn disconnect(&self, address: &str) -> Result<(), RegistryError> {
        let mut guard = self.subscribers.lock().await;
        match guard.remove(address) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotRegistered(address.to_string())),
        }
    }

    /// Delivers `event` to every subscriber whose command patterns match `command`, each call
    /// bounded to one second. Failures are logged per-subscriber; publication never fails as a
    /// whole and there are no retries.
    pub async fn publish(&self, command: &str, event: &ApiEvent) {
        let snapshot: Vec<(String, SubscriberEntry)> = {
            let guard = self.subscribers.lock().await;
            guard.iter().map(|(addr, entry)| (addr.clone(), entry.clone())).collect()
        };

        for (address, mut entry) in snapshot {
            if !entry.commands.iter().any(|pattern| glob_match(pattern, command)) {
                continue;
            }

            let request = tonic::Request::new(swarpf_rpc::proxyapi::ApiEvent {
                command: event.command.clone(),
                request: event.request.clone(),
                response: event.response.clone(),
            });

            match tokio::time::timeout(PUBLISH_TIMEOUT, entry.client.on_receive_api_event(request)).await {
                Ok(Ok(_)) => {
                    tracing::debug!(%address, command, "published event to subscriber");
                }
                Ok(Err(err)) => {
                    tracing::warn!(%address, command, error = %err, "subscriber RPC call failed");
                }
                Err(_) => {
                    tracing::warn!(%address, command, "subscriber RPC call timed out");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_match_supports_prefix_patterns() {
        assert!(glob_match("Battle*", "BattleDungeonStart"));
        assert!(!glob_match("GetWizard*", "BattleDungeonStart"));
    }

    #[test]
    fn glob_match_rejects_invalid_patterns() {
        assert!(!glob_match("[", "anything"));
    }

    #[tokio::test]
    async fn disconnect_of_unknown_address_fails() {
        let registry = Registry::new();
        let err = registry.disconnect("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn register_of_unreachable_address_fails_without_leaving_an_entry() {
        // Port 0 is never a real dial target, so this exercises the failure path without
        // needing a live listener.
        let registry = Registry::new();
        let result = registry.register("127.0.0.1:0".to_string(), vec!["*".to_string()]).await;
        assert!(result.is_err());
        assert!(registry.disconnect("127.0.0.1:0").await.is_err());
    }
}
