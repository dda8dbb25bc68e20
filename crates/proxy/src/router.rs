//! The seam between the MITM engine and whatever publishes completed events.
//!
//! The engine only knows how to assemble an [`ApiEvent`]; it hands the event to an
//! [`EventRouter`] implementation without knowing whether that means an in-process listener, a
//! remote RPC subscriber, or (in tests) nothing at all.

use async_trait::async_trait;
use swarpf_emitter::ApiEvent;

/// Receives assembled events from the MITM engine for fan-out.
#[async_trait]
pub trait EventRouter: Send + Sync {
    /// Routes a completed event. Implementations MUST NOT propagate downstream publication
    /// failures back to the caller; per §7, analysis/publication failures are always local.
    async fn route(&self, event: ApiEvent);
}

/// An [`EventRouter`] that discards every event. Used where interception is configured but no
/// publication sink has been wired up (e.g. unit tests of the engine itself).
#[derive(Default)]
pub struct NullRouter;

#[async_trait]
impl EventRouter for NullRouter {
    async fn route(&self, _event: ApiEvent) {}
}
