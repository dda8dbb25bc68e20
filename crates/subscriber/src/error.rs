use thiserror::Error;

/// Errors raised by the subscriber registry's `Register`/`Disconnect` operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A second `Register` for an address that is already present.
    #[error("proxy api client with this address already exists")]
    AlreadyRegistered(String),
    /// A `Disconnect` for an address that was never registered (or already disconnected).
    #[error("proxy api client with this address does not exist")]
    NotRegistered(String),
    /// The subscriber's own address could not be parsed as an RPC endpoint.
    #[error("invalid subscriber address {0}: {1}")]
    InvalidAddress(String, #[source] tonic::transport::Error),
    /// Dialing the subscriber's consumer service failed or exceeded the registration timeout.
    #[error("failed to connect to {0}: {1}")]
    DialFailed(String, #[source] tonic::transport::Error),
}
