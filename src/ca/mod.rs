//! Per-run certificate authority for TLS interception.
//!
//! This module provides:
//! - Generation of the root key and self-signed root certificate
//! - One shared leaf key used for every intercepted hostname
//! - A leaf certificate cache keyed by hostname, filled under a single
//!   issuance lock so each hostname is signed exactly once
//!
//! The root and leaf certificates are written to the certificate directory as
//! `ca.crt` and `<hostname>.crt`, so clients may choose to trust the root.

mod signer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;

use crate::config::CA_COMMON_NAME;
use crate::error_handling::CertificateError;

// Re-export public API
pub use signer::{LeafSigner, RcgenSigner};

const ROOT_CERT_FILE: &str = "ca.crt";

/// A cached leaf certificate and the TLS configuration serving it.
#[derive(Debug)]
pub struct LeafCertificate {
    pub hostname: String,
    pub cert_path: PathBuf,
    pub server_config: Arc<ServerConfig>,
}

/// The certificate authority of one proxy run.
///
/// The root material is read-only after construction and safely shared by all
/// connection handlers through an `Arc`.
pub struct CertificateAuthority {
    cert_dir: PathBuf,
    root_der: CertificateDer<'static>,
    root_pem: String,
    issuer: Issuer<'static, KeyPair>,
    leaf_key: KeyPair,
    signer: Box<dyn LeafSigner>,
    leaves: Mutex<HashMap<String, Arc<LeafCertificate>>>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cert_dir", &self.cert_dir)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Creates a fresh authority that signs leaves in-process.
    ///
    /// # Errors
    ///
    /// Returns `CertificateError` if key generation fails or `cert_dir` is not writable.
    pub fn new(cert_dir: impl Into<PathBuf>) -> Result<Self, CertificateError> {
        Self::with_signer(cert_dir, Box::new(RcgenSigner))
    }

    /// Creates a fresh authority that delegates leaf signing to `signer`.
    ///
    /// # Errors
    ///
    /// Returns `CertificateError` if key generation fails or `cert_dir` is not writable.
    pub fn with_signer(
        cert_dir: impl Into<PathBuf>,
        signer: Box<dyn LeafSigner>,
    ) -> Result<Self, CertificateError> {
        let cert_dir = cert_dir.into();
        std::fs::create_dir_all(&cert_dir).map_err(|source| CertificateError::Write {
            path: cert_dir.clone(),
            source,
        })?;

        let root_key = KeyPair::generate()?;
        let root_params = root_params();
        let root_cert = root_params.self_signed(&root_key)?;
        let root_pem = root_cert.pem();
        let root_der = root_cert.der().clone();
        let issuer = Issuer::new(root_params, root_key);

        write_pem(&cert_dir.join(ROOT_CERT_FILE), &root_pem)?;
        log::info!(
            "Generated root certificate {}",
            cert_dir.join(ROOT_CERT_FILE).display()
        );

        Ok(Self {
            cert_dir,
            root_der,
            root_pem,
            issuer,
            leaf_key: KeyPair::generate()?,
            signer,
            leaves: Mutex::new(HashMap::new()),
        })
    }

    /// PEM encoding of the root certificate.
    pub fn ca_certificate_pem(&self) -> &str {
        &self.root_pem
    }

    /// Path of the written root certificate.
    pub fn ca_certificate_path(&self) -> PathBuf {
        self.cert_dir.join(ROOT_CERT_FILE)
    }

    /// Number of hostnames with an issued leaf.
    pub fn cached_leaves(&self) -> usize {
        self.leaves.lock().map(|leaves| leaves.len()).unwrap_or(0)
    }

    /// Returns the leaf certificate for `hostname`, issuing it on first use.
    ///
    /// Hostnames are matched case-insensitively; brackets around IPv6
    /// literals are ignored. Signing happens under the issuance lock, so
    /// concurrent first requests for the same hostname sign once. This call
    /// blocks; async callers should run it on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns `CertificateError` if the hostname is unusable or issuance fails.
    pub fn leaf_for(&self, hostname: &str) -> Result<Arc<LeafCertificate>, CertificateError> {
        let hostname = normalize_hostname(hostname)?;

        let mut leaves = self
            .leaves
            .lock()
            .map_err(|_| CertificateError::Task("issuance lock poisoned".to_string()))?;
        if let Some(leaf) = leaves.get(&hostname) {
            return Ok(Arc::clone(leaf));
        }

        let leaf_cert = self.signer.sign(&hostname, &self.leaf_key, &self.issuer)?;
        let cert_path = self.cert_dir.join(format!("{hostname}.crt"));
        write_pem(&cert_path, &leaf_cert.pem())?;

        let chain = vec![leaf_cert.der().clone(), self.root_der.clone()];
        let server_config = build_server_config(chain, &self.leaf_key)?;
        let leaf = Arc::new(LeafCertificate {
            hostname: hostname.clone(),
            cert_path,
            server_config,
        });
        leaves.insert(hostname.clone(), Arc::clone(&leaf));
        log::debug!("Issued leaf certificate for {hostname}");

        Ok(leaf)
    }
}

fn root_params() -> CertificateParams {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];
    params.serial_number = Some(signer::random_serial());
    signer::apply_validity(&mut params);

    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, CA_COMMON_NAME);
    params.distinguished_name = subject;
    params
}

fn build_server_config(
    chain: Vec<CertificateDer<'static>>,
    leaf_key: &KeyPair,
) -> Result<Arc<ServerConfig>, CertificateError> {
    let private_key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, private_key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

fn normalize_hostname(hostname: &str) -> Result<String, CertificateError> {
    let trimmed = hostname
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.');
    if trimmed.is_empty()
        || trimmed.contains(['/', '\\'])
        || trimmed.starts_with('.')
        || trimmed.contains("..")
    {
        return Err(CertificateError::InvalidHostname(hostname.to_string()));
    }
    Ok(trimmed.to_ascii_lowercase())
}

fn write_pem(path: &Path, pem: &str) -> Result<(), CertificateError> {
    std::fs::write(path, pem).map_err(|source| CertificateError::Write {
        path: path.to_path_buf(),
        source,
    })
}
