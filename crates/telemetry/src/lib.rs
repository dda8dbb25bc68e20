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

//! Structured logging initialization and a side-channel health endpoint.

/// A lightweight HTTP server exposing `/healthz`.
pub mod http;
/// The initialization routine for global structured logging.
pub mod init;
