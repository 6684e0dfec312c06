//! `Core`: the explicit, no-globals wiring point named in SPEC_FULL.md
//! [CORE]. Replaces the teacher's cached-factory singleton (§9) with a
//! plain value constructed once and threaded through every entry point,
//! `Send + Sync` so it can be wrapped in `Arc` and shared across tasks —
//! each store it owns manages its own interior locking (§5).

use crate::attendance::{AttendanceFilter, AttendanceRecord, AttendanceRecorder};
use crate::authorization::AuthorizationStore;
use crate::ca::CaCore;
use crate::challenge::{Challenge, ChallengeRegistry};
use crate::config::Config;
use crate::crl::CrlManager;
use crate::error::{
    AuthorizationError, CaError, CertError, ChallengeError, CoreError, IssueError, RecordingError,
    SignatureError,
};
use crate::profile::SubjectKind;
use crate::registry::{CertificateRegistry, RevocationReason};
use crate::validator::{self, SubjectInfo};
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Core {
    pub ca: CaCore,
    pub crl: CrlManager,
    pub challenges: ChallengeRegistry,
    pub authorization: AuthorizationStore,
    pub attendance: AttendanceRecorder,
    pub config: Config,
    registry: Arc<CertificateRegistry>,
}

/// Outcome of the full access-attempt state machine (§4's "Access flow").
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub attendance: AttendanceRecord,
}

impl Core {
    /// Construct every component once. Idempotent with respect to the CA:
    /// re-running against the same `ca_dir` loads the existing root
    /// instead of minting a second one.
    pub async fn init(config: Config, now: DateTime<Utc>) -> Result<Self, CoreError> {
        crate::config::ensure_dirs(&config).map_err(|e| CaError::Infra(e.into()))?;

        let registry = Arc::new(CertificateRegistry::load(config.cert_registry_path())?);
        let ca = CaCore::init(&config, registry.clone(), now)?;
        let crl = CrlManager::load(config.crl_path(), config.crl_validity_days)?;
        let challenges = ChallengeRegistry::new(config.challenge_ttl, config.nonce_window);

        let db_url = format!("sqlite://{}?mode=rwc", config.db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| crate::error::InfraError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let authorization = AuthorizationStore::new(pool.clone())
            .await
            .map_err(CoreError::from)?;

        // Backend signing key for attendance records (§9's open question):
        // a dedicated key distinct from the CA key, issued once and cached
        // alongside the CA artifacts rather than regenerated per record.
        let (signing_key_pem, backend_spki_der) = load_or_create_backend_key(&config)?;
        let attendance = AttendanceRecorder::new(pool, signing_key_pem, backend_spki_der)
            .await
            .map_err(CoreError::from)?;

        Ok(Self {
            ca,
            crl,
            challenges,
            authorization,
            attendance,
            config,
            registry,
        })
    }

    pub fn issue_student(
        &self,
        student_id: &str,
        email: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(String, String), IssueError> {
        let result = self.ca.issue_student(
            student_id,
            email,
            self.config.student_validity_days,
            self.config.rsa_bits,
            now,
        );
        match &result {
            Ok(_) => info!(student_id, "issued student certificate"),
            Err(e) => warn!(student_id, error = %e, "student issuance denied"),
        }
        result
    }

    pub fn issue_door(
        &self,
        door_id: &str,
        room_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, String), IssueError> {
        let result = self
            .ca
            .issue_door(door_id, room_id, self.config.door_validity_days, self.config.rsa_bits, now);
        match &result {
            Ok(_) => info!(door_id, room_id, "issued door certificate"),
            Err(e) => warn!(door_id, error = %e, "door issuance denied"),
        }
        result
    }

    pub fn issue_server(
        &self,
        server_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, String), IssueError> {
        let result = self
            .ca
            .issue_server(server_id, self.config.server_validity_days, self.config.rsa_bits, now);
        match &result {
            Ok(_) => info!(server_id, "issued server certificate"),
            Err(e) => warn!(server_id, error = %e, "server issuance denied"),
        }
        result
    }

    pub fn revoke(&self, serial: u64, reason_code: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        let reason = RevocationReason::from_str(reason_code).ok_or(crate::error::CrlError::UnknownReason)?;
        self.registry.mark_revoked(serial, reason, now)?;
        self.crl.revoke(serial, reason_code, now)?;
        info!(serial, reason_code, "certificate revoked");
        Ok(())
    }

    pub fn validate(&self, cert_pem: &str, expected_kind: SubjectKind, now: DateTime<Utc>) -> Result<SubjectInfo, CertError> {
        let result = validator::validate(cert_pem, expected_kind, &self.ca, &self.crl, now);
        if let Err(e) = &result {
            warn!(error = %e, "certificate validation denied");
        }
        result
    }

    /// Step 1-2 of the access flow: validate the student's certificate,
    /// then issue a challenge.
    pub fn begin_access(
        &self,
        student_cert_pem: &str,
        previous_nonce: &str,
        room_id: &str,
        door_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Challenge, CoreError> {
        let subject = self.validate(student_cert_pem, SubjectKind::Student, now)?;
        let challenge = self
            .challenges
            .generate(subject.serial, room_id, door_id, previous_nonce, now)
            .inspect_err(|e| warn!(student_serial = subject.serial, error = %e, "challenge denied"))?;
        Ok(challenge)
    }

    /// Steps 3-7: re-validate, consume the challenge atomically, verify the
    /// signature, authorize, and record attendance. Any failure short
    /// circuits into a classified denial; no attendance record is written.
    pub async fn complete_access(
        &self,
        student_cert_pem: &str,
        nonce: &str,
        signature_hex: &str,
        student_id: &str,
        room_id: &str,
        door_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessGrant, CoreError> {
        let subject = self.validate(student_cert_pem, SubjectKind::Student, now)?;

        let challenge = self
            .challenges
            .consume(nonce, now)
            .inspect_err(|e| warn!(student_serial = subject.serial, error = %e, "challenge consume denied"))?;

        if challenge.subject_serial != subject.serial {
            warn!(student_serial = subject.serial, "challenge subject mismatch");
            return Err(ChallengeError::UnknownChallenge.into());
        }

        let verified = crate::signer::verify_challenge(student_cert_pem, &challenge, signature_hex)?;
        if !verified {
            warn!(student_serial = subject.serial, "signature verification failed");
            return Err(SignatureError::VerifyFailed.into());
        }

        self.authorization
            .is_authorized(student_id, room_id, now)
            .await
            .inspect_err(|e| warn!(student_id, room_id, error = %e, "authorization denied"))?;

        let record = self
            .attendance
            .record(student_id, room_id, door_id, now)
            .await
            .inspect_err(|e| warn!(student_id, room_id, error = %e, "attendance recording failed"))?;

        info!(student_id, room_id, door_id, "access granted");
        Ok(AccessGrant { attendance: record })
    }

    pub async fn authorize(
        &self,
        student_id: &str,
        room_id: &str,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<(), AuthorizationError> {
        self.authorization
            .authorize(student_id, room_id, start_time, end_time)
            .await
            .map_err(|_| AuthorizationError::NotAuthorizedForRoom)
    }

    pub async fn query_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>, RecordingError> {
        self.attendance.query(filter).await
    }

    pub fn registry(&self) -> &Arc<CertificateRegistry> {
        &self.registry
    }
}

fn load_or_create_backend_key(config: &Config) -> Result<(String, Vec<u8>), CoreError> {
    let key_path = config.ca_dir.join("backend_signing_key.pem");
    let cert_path = config.ca_dir.join("backend_signing_cert.pem");

    if key_path.exists() && cert_path.exists() {
        let key_pem = std::fs::read_to_string(&key_path).map_err(|e| CaError::Infra(e.into()))?;
        let cert_pem = std::fs::read_to_string(&cert_path).map_err(|e| CaError::Infra(e.into()))?;
        let meta = crate::metadata::CertMetadata::from_pem(&cert_pem)?;
        let _ = meta;
        let spki_der = spki_der_from_cert(&cert_pem)?;
        return Ok((key_pem, spki_der));
    }

    // No backend cert yet: the caller issues one via `Core::issue_server`
    // on first run and this path is exercised again on the next `init`.
    // For a fresh deployment we fall back to a bare keypair (not yet CA
    // signed) so attendance recording has a signing key from the very
    // first call; operators should replace it with a CA-issued server
    // certificate via `issue_server` before going to production.
    let key_material = crate::crypto::generate_rsa(config.rsa_bits)
        .map_err(|e| CaError::KeyGenFailed(e.to_string()))?;
    crate::io::write_secret_file(&key_path, &key_material.private_key_pem)
        .map_err(|e| CaError::Infra(e.into()))?;
    let spki_der = rsa_pub_spki_der(&key_material.private_key_pem)?;
    Ok((key_material.private_key_pem, spki_der))
}

fn spki_der_from_cert(cert_pem: &str) -> Result<Vec<u8>, CoreError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes()).map_err(|_| CertError::BadEncoding)?;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents).map_err(|_| CertError::BadEncoding)?;
    Ok(cert.tbs_certificate.subject_pki.subject_public_key.data.to_vec())
}

/// Returns the raw PKCS#1 `RSAPublicKey` DER bytes — the same encoding
/// `x509_parser` exposes as `subject_public_key.data` for an RSA SPKI, so
/// this is interchangeable with a certificate-embedded key everywhere
/// `crypto::verify_with_spki_der` is called.
fn rsa_pub_spki_der(priv_key_pem: &str) -> Result<Vec<u8>, CoreError> {
    use rsa::pkcs1::EncodeRsaPublicKey;
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::RsaPrivateKey;
    let key = RsaPrivateKey::from_pkcs8_pem(priv_key_pem)
        .map_err(|e| CaError::KeyGenFailed(e.to_string()))?;
    let pub_key = key.to_public_key();
    let der = pub_key
        .to_pkcs1_der()
        .map_err(|e| CaError::KeyGenFailed(e.to_string()))?;
    Ok(der.as_bytes().to_vec())
}
