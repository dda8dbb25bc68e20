use thiserror::Error;

/// Errors raised while operating the MITM proxy engine.
///
/// Per-request variants are always logged and converted into pass-through behavior by the
/// caller; none of these ever becomes a modified HTTP status returned to the client.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The client's TLS handshake during MITM interception failed.
    #[error("client TLS handshake failed: {0}")]
    ClientHandshake(#[source] std::io::Error),
    /// The handshake with the real upstream server failed.
    #[error("upstream TLS handshake failed: {0}")]
    UpstreamHandshake(#[source] std::io::Error),
    /// Could not open a TCP connection to the upstream host.
    #[error("failed to connect to upstream {0}: {1}")]
    UpstreamConnect(String, #[source] std::io::Error),
    /// The upstream HTTP/1 connection could not be established.
    #[error("upstream HTTP handshake failed: {0}")]
    UpstreamHttp(#[source] hyper::Error),
    /// Reading a request or response body failed.
    #[error("failed to read body: {0}")]
    BodyRead(#[source] hyper::Error),
    /// A leaf certificate for a MITM'd host could not be minted.
    #[error("failed to mint leaf certificate for {0}: {1}")]
    LeafCertificate(String, #[source] swarpf_ca::CaError),
    /// The minted leaf certificate's PEM could not be parsed into a TLS server config.
    #[error("failed to build TLS server config: {0}")]
    TlsConfig(#[source] rustls::Error),
    /// No certificate was found in a certificate chain PEM block.
    #[error("no certificates found in PEM")]
    NoCertificates,
    /// No private key was found in a private key PEM block.
    #[error("no private key found in PEM")]
    NoPrivateKey,
    /// The upstream host could not be resolved as a TLS server name.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
}
