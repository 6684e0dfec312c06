//! Certificate metadata extraction (SPEC_FULL.md "Supplemented" section).
//! Grounded directly on `crab-cert::metadata::CertMetadata`: a read-only
//! view of a parsed certificate for display purposes, so a caller (the
//! out-of-scope HTTP layer) doesn't need to re-derive x509-parser calls of
//! its own just to show a serial or expiry date.

use crate::error::CertError;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct CertMetadata {
    pub common_name: Option<String>,
    pub serial_hex: String,
    pub fingerprint_sha256: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertMetadata {
    pub fn from_pem(pem: &str) -> Result<Self, CertError> {
        let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).map_err(|_| CertError::BadEncoding)?;
        Self::from_der(&parsed.contents)
    }

    pub fn from_der(der: &[u8]) -> Result<Self, CertError> {
        let mut hasher = Sha256::new();
        hasher.update(der);
        let fingerprint_sha256 = hex::encode(hasher.finalize());

        let (_, x509) = x509_parser::parse_x509_certificate(der).map_err(|_| CertError::BadEncoding)?;

        let mut common_name = None;
        for rdn in x509.subject().iter_rdn() {
            for attr in rdn.iter() {
                if attr.attr_type() == &x509_parser::oid_registry::OID_X509_COMMON_NAME {
                    common_name = attr.as_str().ok().map(|s| s.to_string());
                }
            }
        }

        let serial_hex = x509.tbs_certificate.raw_serial_as_string();
        let not_before = DateTime::from_timestamp(x509.validity().not_before.timestamp(), 0)
            .unwrap_or_default();
        let not_after = DateTime::from_timestamp(x509.validity().not_after.timestamp(), 0)
            .unwrap_or_default();

        Ok(Self {
            common_name,
            serial_hex,
            fingerprint_sha256,
            not_before,
            not_after,
        })
    }

    pub fn verify_fingerprint(&self, expected_sha256_hex: &str) -> bool {
        self.fingerprint_sha256.eq_ignore_ascii_case(expected_sha256_hex)
    }
}
