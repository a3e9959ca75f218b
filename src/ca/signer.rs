//! Leaf certificate signing.

use std::net::IpAddr;

use chrono::{Datelike, Duration as ChronoDuration, Utc};
use rcgen::{
    date_time_ymd, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};

use crate::config::CERT_VALIDITY_DAYS;
use crate::error_handling::CertificateError;

/// Issues leaf certificates on behalf of the certificate authority.
///
/// The authority calls the signer at most once per hostname, while holding
/// its issuance lock, so implementations need not be reentrant.
pub trait LeafSigner: Send + Sync {
    /// Signs a certificate for `hostname` over the public half of `leaf_key`.
    ///
    /// # Errors
    ///
    /// Returns `CertificateError` if the hostname is not a valid subject or
    /// signing fails.
    fn sign(
        &self,
        hostname: &str,
        leaf_key: &KeyPair,
        issuer: &Issuer<'static, KeyPair>,
    ) -> Result<Certificate, CertificateError>;
}

/// In-process signer backed by `rcgen`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RcgenSigner;

impl LeafSigner for RcgenSigner {
    fn sign(
        &self,
        hostname: &str,
        leaf_key: &KeyPair,
        issuer: &Issuer<'static, KeyPair>,
    ) -> Result<Certificate, CertificateError> {
        let params = leaf_params(hostname)?;
        Ok(params.signed_by(leaf_key, issuer)?)
    }
}

/// Sets the validity window: from yesterday (tolerating clock skew) for
/// `CERT_VALIDITY_DAYS` days.
pub(crate) fn apply_validity(params: &mut CertificateParams) {
    let yesterday = Utc::now() - ChronoDuration::days(1);
    let expiry = yesterday + ChronoDuration::days(CERT_VALIDITY_DAYS);
    params.not_before = date_time_ymd(yesterday.year(), yesterday.month() as u8, yesterday.day() as u8);
    params.not_after = date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);
}

/// Random positive 63-bit serial number.
pub(crate) fn random_serial() -> SerialNumber {
    SerialNumber::from(rand::random::<u64>() >> 1)
}

fn leaf_params(hostname: &str) -> Result<CertificateParams, CertificateError> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.is_ca = IsCa::NoCa;
    params.use_authority_key_identifier_extension = true;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.serial_number = Some(random_serial());
    apply_validity(&mut params);

    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, hostname.to_string());
    params.distinguished_name = subject;

    if let Ok(ip) = hostname.parse::<IpAddr>() {
        params.subject_alt_names.push(SanType::IpAddress(ip));
    } else {
        let name = hostname
            .try_into()
            .map_err(|_| CertificateError::InvalidHostname(hostname.to_string()))?;
        params.subject_alt_names.push(SanType::DnsName(name));
    }

    Ok(params)
}
