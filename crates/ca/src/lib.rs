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

//! Persistence for the MITM root CA and on-demand minting of per-host leaf certificates.
//!
//! The root is a 2048-bit RSA key, generated once and persisted as `ca.crt`/`ca.key` in a
//! configured directory. Leaf certificates are minted lazily, one per intercepted host, using
//! a faster P-256 ECDSA key signed by that root.

use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::pkcs8::EncodePrivateKey;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

const ROOT_VALIDITY_DAYS: i64 = 365;
const ROOT_CERT_FILE: &str = "ca.crt";
const ROOT_KEY_FILE: &str = "ca.key";

/// Errors raised while loading, generating, or using the root CA.
#[derive(Error, Debug)]
pub enum CaError {
    /// An I/O error occurred reading, writing, or creating CA state on disk.
    #[error("CA store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Certificate or key material could not be generated or signed.
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),
    /// The RSA root keypair could not be generated.
    #[error("RSA key generation failed: {0}")]
    RsaKeyGen(#[from] rsa::Error),
    /// The RSA root keypair could not be encoded to PKCS#8.
    #[error("RSA key encoding failed: {0}")]
    RsaEncode(#[from] rsa::pkcs8::Error),
    /// The on-disk PEM for the CA certificate or key was malformed.
    #[error("malformed CA material on disk: {0}")]
    MalformedPem(String),
}

/// The loaded (or freshly generated) root CA: signing material plus its PEM encoding.
pub struct RootCa {
    cert: rcgen::Certificate,
    key_pair: KeyPair,
    cert_pem: String,
}

impl RootCa {
    /// Loads the root CA from `dir`, generating and persisting a fresh one if either
    /// `ca.crt` or `ca.key` is absent.
    pub fn load(dir: &Path) -> Result<Self, CaError> {
        fs::create_dir_all(dir)?;
        let cert_path = dir.join(ROOT_CERT_FILE);
        let key_path = dir.join(ROOT_KEY_FILE);

        if cert_path.exists() && key_path.exists() {
            match Self::from_disk(&cert_path, &key_path) {
                Ok(ca) => return Ok(ca),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to load existing CA, regenerating");
                }
            }
        }

        let ca = Self::generate()?;
        write_private_file(&cert_path, ca.cert_pem.as_bytes(), 0o644)?;
        write_private_file(&key_path, ca.key_pair.serialize_pem().as_bytes(), 0o600)?;
        tracing::info!(dir = %dir.display(), "generated new root CA");
        Ok(ca)
    }

    fn from_disk(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        let cert_pem = fs::read_to_string(cert_path)?;
        let key_pem = fs::read_to_string(key_path)?;
        let key_pair =
            KeyPair::from_pem(&key_pem).map_err(|e| CaError::MalformedPem(e.to_string()))?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| CaError::MalformedPem(e.to_string()))?;
        let cert = params.self_signed(&key_pair)?;
        Ok(Self {
            cert,
            key_pair,
            cert_pem,
        })
    }

    fn generate() -> Result<Self, CaError> {
        let mut rng = rand::rngs::OsRng;
        let rsa_key = rsa::RsaPrivateKey::new(&mut rng, 2048)?;
        let der = rsa_key.to_pkcs8_der()?;
        let key_pair = KeyPair::from_der(der.as_bytes())?;

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "swarpf v2");
        dn.push(DnType::LocalityName, "Local Network");
        params.distinguished_name = dn;
        params.serial_number = Some(random_serial());
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::seconds(10);
        params.not_after = now + Duration::days(ROOT_VALIDITY_DAYS);

        let cert = params.self_signed(&key_pair)?;
        let cert_pem = cert.pem();
        Ok(Self {
            cert,
            key_pair,
            cert_pem,
        })
    }

    /// Returns the PEM encoding of the root certificate, as served at `/ca.crt`.
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Mints a fresh leaf certificate and key for `host`, signed by this root.
    ///
    /// `host` may be a DNS name or a literal IP address; the resulting certificate carries
    /// the appropriate `SubjectAltName` either way.
    pub fn issue_leaf(&self, host: &str) -> Result<LeafCert, CaError> {
        let mut params = if let Ok(ip) = host.parse::<IpAddr>() {
            let mut params = CertificateParams::new(Vec::<String>::new())?;
            params.subject_alt_names.push(SanType::IpAddress(ip));
            params
        } else {
            let mut params = CertificateParams::new(Vec::<String>::new())?;
            let dns = Ia5String::try_from(host.to_string())
                .map_err(|e| CaError::MalformedPem(e.to_string()))?;
            params.subject_alt_names.push(SanType::DnsName(dns));
            params
        };
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;

        let leaf_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let leaf_cert = params.signed_by(&leaf_key, &self.cert, &self.key_pair)?;

        Ok(LeafCert {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }
}

/// A per-host TLS certificate and private key, minted on demand and cached by the caller.
pub struct LeafCert {
    /// PEM-encoded certificate chain (leaf only; the client is expected to already trust the root).
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key for the leaf certificate.
    pub key_pem: String,
}

fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    SerialNumber::from_slice(&bytes)
}

fn write_private_file(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_generates_and_persists_a_root_ca() {
        let dir = tempdir().expect("tempdir");
        let ca = RootCa::load(dir.path()).expect("generate");
        assert!(ca.certificate_pem().contains("BEGIN CERTIFICATE"));
        assert!(dir.path().join(ROOT_CERT_FILE).exists());
        assert!(dir.path().join(ROOT_KEY_FILE).exists());
    }

    #[test]
    fn load_is_stable_across_runs() {
        let dir = tempdir().expect("tempdir");
        let first = RootCa::load(dir.path()).expect("first load");
        let second = RootCa::load(dir.path()).expect("second load");
        assert_eq!(first.certificate_pem(), second.certificate_pem());
    }

    #[test]
    fn load_regenerates_when_key_file_is_missing() {
        let dir = tempdir().expect("tempdir");
        let first = RootCa::load(dir.path()).expect("first load");
        std::fs::remove_file(dir.path().join(ROOT_KEY_FILE)).expect("remove key");
        let second = RootCa::load(dir.path()).expect("second load");
        assert_ne!(first.certificate_pem(), second.certificate_pem());
    }

    #[test]
    fn issue_leaf_mints_a_cert_for_a_dns_name() {
        let dir = tempdir().expect("tempdir");
        let ca = RootCa::load(dir.path()).expect("load");
        let leaf = ca
            .issue_leaf("summonerswar-prod.qpyou.cn")
            .expect("issue leaf");
        assert!(leaf.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(leaf.key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn issue_leaf_mints_a_cert_for_an_ip_host() {
        let dir = tempdir().expect("tempdir");
        let ca = RootCa::load(dir.path()).expect("load");
        let leaf = ca.issue_leaf("127.0.0.1").expect("issue leaf");
        assert!(leaf.cert_pem.contains("BEGIN CERTIFICATE"));
    }
}
