#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! The MITM HTTP(S) forward proxy engine: endpoint matching, TLS interception via a minted
//! per-host leaf certificate, the codec-backed game-endpoint pipeline, the location-response
//! rewriter, and the [`EventRouter`] seam handed completed events.
//!
//! Everything outside the engine that needs to change is exposed here: [`EngineConfig`]
//! configures behavior, [`EventRouter`] is the trait a publication layer implements, and
//! [`ProxyEngine`] is the thing a binary constructs once and hands accepted TCP connections to.

mod assembly;
mod engine;
mod error;
mod matchers;
mod rewriter;
mod router;
mod session;
mod tls;

pub use engine::{EngineConfig, ProxyEngine};
pub use error::ProxyError;
pub use router::{EventRouter, NullRouter};
