//! CA core (§4.C). Grounded on `crab-cert::ca::CertificateAuthority`,
//! generalized to the fixed SecureAttend extension set (§3) per subject
//! kind, and to the registry-backed duplicate-issuance check §4.C requires.

use crate::config::Config;
use crate::crypto;
use crate::error::{CaError, InfraError, IssueError};
use crate::io::write_secret_file;
use crate::profile::{self, CaProfile, CertProfile, SubjectKind};
use crate::registry::{CertificateRecord, CertStatus, CertificateRegistry};
use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, Issuer, KeyPair};
use std::sync::Arc;

/// Owns the CA's private key and self-signed certificate for the lifetime
/// of the process (§5, "resource lifetimes"). Never hands the CA private
/// key itself to a caller — only the certs and keys it issues for others.
pub struct CaCore {
    params: CertificateParams,
    key_pair: KeyPair,
    cert_pem: String,
    registry: Arc<CertificateRegistry>,
}

impl CaCore {
    /// Idempotent: loads existing CA artifacts from `cfg.ca_dir` if both the
    /// key and certificate parse, otherwise generates and persists a new
    /// self-signed root.
    pub fn init(cfg: &Config, registry: Arc<CertificateRegistry>, now: DateTime<Utc>) -> Result<Self, CaError> {
        let key_path = cfg.ca_private_key_path();
        let cert_path = cfg.ca_certificate_path();

        if key_path.exists() && cert_path.exists() {
            let key_pem = std::fs::read_to_string(&key_path).map_err(|e| CaError::Infra(e.into()))?;
            let cert_pem = std::fs::read_to_string(&cert_path).map_err(|e| CaError::Infra(e.into()))?;
            return Self::load(&cert_pem, &key_pem, registry);
        }

        let ca_profile = CaProfile::root("SecureAttend Root CA", cfg.ca_validity_days);
        let params = profile::create_ca_params(&ca_profile, now);
        let key_material = crypto::generate_rsa(cfg.rsa_bits)
            .map_err(|e| CaError::KeyGenFailed(e.to_string()))?;
        let key_pair = KeyPair::from_pem(&key_material.private_key_pem)
            .map_err(|e| CaError::KeyGenFailed(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CaError::KeyGenFailed(e.to_string()))?;
        let cert_pem = cert.pem();

        std::fs::create_dir_all(&cfg.ca_dir).map_err(|e| CaError::Infra(e.into()))?;
        write_secret_file(&key_path, key_pair.serialize_pem()).map_err(|e| CaError::Infra(e.into()))?;
        std::fs::write(&cert_path, &cert_pem).map_err(|e| CaError::Infra(e.into()))?;

        Ok(Self {
            params,
            key_pair,
            cert_pem,
            registry,
        })
    }

    fn load(cert_pem: &str, key_pem: &str, registry: Arc<CertificateRegistry>) -> Result<Self, CaError> {
        let key_pair =
            KeyPair::from_pem(key_pem).map_err(|e| CaError::RegistryCorrupt(e.to_string()))?;

        let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
            .map_err(|e| CaError::RegistryCorrupt(e.to_string()))?;
        let (_, x509) = x509_parser::parse_x509_certificate(&pem.contents)
            .map_err(|e| CaError::RegistryCorrupt(e.to_string()))?;

        let mut params = CertificateParams::new(Vec::new()).expect("empty SAN list is always valid");
        let mut dn = rcgen::DistinguishedName::new();
        for rdn in x509.subject().iter_rdn() {
            for attr in rdn.iter() {
                let oid = attr.attr_type();
                let val = attr.as_str().unwrap_or_default().to_string();
                if oid == &x509_parser::oid_registry::OID_X509_COMMON_NAME {
                    dn.push(rcgen::DnType::CommonName, val);
                } else if oid == &x509_parser::oid_registry::OID_X509_ORGANIZATION_NAME {
                    dn.push(rcgen::DnType::OrganizationName, val);
                }
            }
        }
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![rcgen::KeyUsagePurpose::KeyCertSign, rcgen::KeyUsagePurpose::CrlSign];

        Ok(Self {
            params,
            key_pair,
            cert_pem: cert_pem.to_string(),
            registry,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    fn issuer(&self) -> Issuer<'_, KeyPair> {
        Issuer::new(self.params.clone(), &self.key_pair)
    }

    /// Issue an end-entity certificate per the seven steps of §4.C:
    /// generate a keypair, assemble the subject profile, set extensions,
    /// allocate a serial, sign, register, and return `(cert_pem, key_pem)`.
    /// The private key is handed back to the caller and not retained here.
    fn issue(&self, cert_profile: CertProfile, rsa_bits: u32, now: DateTime<Utc>) -> Result<(String, String), IssueError> {
        if self
            .registry
            .active_subject(cert_profile.kind, &cert_profile.subject_id)
            .is_some()
        {
            return Err(IssueError::AlreadyIssued(cert_profile.subject_id.clone()));
        }

        let mut params = profile::create_cert_params(&cert_profile, now).map_err(IssueError::CryptoFailed)?;
        let serial_num = crypto::serial_random();
        params.serial_number = Some(rcgen::SerialNumber::from_slice(&serial_num.to_be_bytes()));

        let key_material =
            crypto::generate_rsa(rsa_bits).map_err(|e| IssueError::CryptoFailed(e.to_string()))?;
        let key_pair = KeyPair::from_pem(&key_material.private_key_pem)
            .map_err(|e| IssueError::CryptoFailed(e.to_string()))?;

        let issuer = self.issuer();
        let cert = params
            .signed_by(&key_pair, &issuer)
            .map_err(|e| IssueError::CryptoFailed(e.to_string()))?;

        let record = CertificateRecord {
            serial: serial_num,
            kind: cert_profile.kind,
            subject_id: cert_profile.subject_id.clone(),
            issued_at: now,
            not_after: now + chrono::Duration::days(cert_profile.validity_days as i64),
            status: CertStatus::Active,
            revoked_at: None,
            reason: None,
        };
        self.registry
            .insert(record)
            .map_err(|e| IssueError::RegistryWriteFailed(e.to_string()))?;

        Ok((cert.pem(), key_pair.serialize_pem()))
    }

    pub fn issue_student(
        &self,
        student_id: &str,
        email: Option<String>,
        validity_days: u32,
        rsa_bits: u32,
        now: DateTime<Utc>,
    ) -> Result<(String, String), IssueError> {
        self.issue(CertProfile::student(student_id, email, validity_days), rsa_bits, now)
    }

    pub fn issue_door(
        &self,
        door_id: &str,
        room_id: &str,
        validity_days: u32,
        rsa_bits: u32,
        now: DateTime<Utc>,
    ) -> Result<(String, String), IssueError> {
        self.issue(CertProfile::door(door_id, room_id, validity_days), rsa_bits, now)
    }

    pub fn issue_server(
        &self,
        server_id: &str,
        validity_days: u32,
        rsa_bits: u32,
        now: DateTime<Utc>,
    ) -> Result<(String, String), IssueError> {
        self.issue(CertProfile::server(server_id, validity_days), rsa_bits, now)
    }

    pub fn registry(&self) -> &Arc<CertificateRegistry> {
        &self.registry
    }

    /// Used by the CRL manager to sign a revocation list with this CA's key.
    pub(crate) fn sign_bytes(&self, data: &[u8]) -> Result<String, CaError> {
        crypto::sign(&self.key_pair.serialize_pem(), data).map_err(|e| {
            CaError::Infra(InfraError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
        })
    }

    /// Build and sign a CRL from the CRL manager's revocation list params.
    pub(crate) fn sign_crl(&self, params: rcgen::CertificateRevocationListParams) -> Result<String, CaError> {
        let issuer = self.issuer();
        let crl = params.signed_by(&self.key_pair, &issuer).map_err(|e| {
            CaError::Infra(InfraError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
        })?;
        Ok(crl.pem())
    }
}

pub fn subject_kind_for(record: &CertificateRecord) -> SubjectKind {
    record.kind
}
