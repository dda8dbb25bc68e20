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

//! The subscriber registry and RPC surface: `Register`/`Disconnect` bookkeeping, glob-matched
//! publication to registered consumers, and the `ProxyApi` service implementation that exposes
//! both over tonic.

mod error;
mod publisher;
mod registry;
mod rpc;

pub use error::RegistryError;
pub use publisher::Publisher;
pub use registry::Registry;
pub use rpc::ProxyApiService;
