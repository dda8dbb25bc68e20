//! TLS plumbing for the MITM engine: turning minted leaf PEM into a server config, and
//! building the client config used to re-originate connections to the real upstream.

use std::io::Cursor;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::ProxyError;

/// Parses a PEM certificate chain into rustls's DER representation.
fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut Cursor::new(pem.as_bytes()))
        .collect::<Result<_, _>>()
        .map_err(|_| ProxyError::NoCertificates)?;
    if certs.is_empty() {
        return Err(ProxyError::NoCertificates);
    }
    Ok(certs)
}

/// Parses a PKCS#8 PEM private key.
fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, ProxyError> {
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut Cursor::new(pem.as_bytes()));
    match keys.next() {
        Some(Ok(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
        _ => Err(ProxyError::NoPrivateKey),
    }
}

/// Builds a one-host TLS server config presenting `leaf` to the client, used to terminate the
/// MITM'd TLS connection once a leaf certificate has been minted for the target host.
pub fn server_config_for_leaf(leaf: &swarpf_ca::LeafCert) -> Result<Arc<ServerConfig>, ProxyError> {
    let certs = parse_certs(&leaf.cert_pem)?;
    let key = parse_private_key(&leaf.key_pem)?;
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(ProxyError::TlsConfig)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Builds the client config used to re-originate a real TLS connection to the upstream game
/// server, trusting the ambient web PKI (the upstream is a real, publicly-trusted host; only
/// the client-facing leg is MITM'd).
pub fn upstream_client_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

/// Resolves `host` into a TLS server name, accepting either a DNS name or a literal IP.
pub fn server_name(host: &str) -> Result<ServerName<'static>, ProxyError> {
    ServerName::try_from(host.to_string()).map_err(|_| ProxyError::InvalidServerName(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_pem_round_trips_into_a_server_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ca = swarpf_ca::RootCa::load(dir.path()).expect("load ca");
        let leaf = ca.issue_leaf("summonerswar-prod.qpyou.cn").expect("issue leaf");
        assert!(server_config_for_leaf(&leaf).is_ok());
    }

    #[test]
    fn upstream_client_config_has_nonempty_roots() {
        // Constructing it at all without panicking is the behavior under test; rustls does
        // not expose root-store size directly off `ClientConfig`.
        let _ = upstream_client_config();
    }

    #[test]
    fn server_name_accepts_dns_and_ip() {
        assert!(server_name("summonerswar-prod.qpyou.cn").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
    }
}
