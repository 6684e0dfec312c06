//! Certificate registry (§4.B): a persistent `serial -> CertificateRecord`
//! catalog with a secondary `(kind, subject_id) -> serial` index.
//!
//! Grounded on `crab-cert::credential::CredentialStorage`'s file-JSON
//! persistence pattern, generalized from a single credential to an indexed
//! collection, and on the teacher's atomic-write discipline (see
//! `crate::io::write_atomic`).

use crate::error::RegistryError;
use crate::profile::SubjectKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertStatus {
    Active,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    Superseded,
    CessationOfOperation,
}

impl RevocationReason {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unspecified" => Some(Self::Unspecified),
            "key_compromise" => Some(Self::KeyCompromise),
            "superseded" => Some(Self::Superseded),
            "cessation_of_operation" => Some(Self::CessationOfOperation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub serial: u64,
    pub kind: SubjectKind,
    pub subject_id: String,
    pub issued_at: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub status: CertStatus,
    pub revoked_at: Option<DateTime<Utc>>,
    pub reason: Option<RevocationReason>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    certificates: Vec<CertificateRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct KindSubjectKey(SubjectKindRepr, String);

// SubjectKind does not implement Hash/Eq by itself (it is re-exported for
// serde); a small mirror lets us key a HashMap on it without adding those
// derives to the public-facing enum used in profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubjectKindRepr {
    Ca,
    Student,
    Door,
    Server,
}

impl From<SubjectKind> for SubjectKindRepr {
    fn from(k: SubjectKind) -> Self {
        match k {
            SubjectKind::Ca => SubjectKindRepr::Ca,
            SubjectKind::Student => SubjectKindRepr::Student,
            SubjectKind::Door => SubjectKindRepr::Door,
            SubjectKind::Server => SubjectKindRepr::Server,
        }
    }
}

struct RegistryState {
    by_serial: HashMap<u64, CertificateRecord>,
    by_subject: HashMap<KindSubjectKey, u64>,
}

impl RegistryState {
    fn from_document(doc: RegistryDocument) -> Self {
        let mut by_serial = HashMap::new();
        let mut by_subject = HashMap::new();
        for rec in doc.certificates {
            by_subject.insert(
                KindSubjectKey(rec.kind.into(), rec.subject_id.clone()),
                rec.serial,
            );
            by_serial.insert(rec.serial, rec);
        }
        Self { by_serial, by_subject }
    }

    fn to_document(&self) -> RegistryDocument {
        let mut certs: Vec<CertificateRecord> = self.by_serial.values().cloned().collect();
        certs.sort_by_key(|r| r.serial);
        RegistryDocument { certificates: certs }
    }
}

/// Persistent, lock-guarded certificate registry.
pub struct CertificateRegistry {
    path: PathBuf,
    state: RwLock<RegistryState>,
}

impl CertificateRegistry {
    /// Load the registry from `path`, creating an empty one if it doesn't
    /// exist yet.
    pub fn load(path: PathBuf) -> Result<Self, RegistryError> {
        let doc = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| RegistryError::Infra(e.into()))?;
            serde_json::from_str(&raw).map_err(|e| {
                RegistryError::Infra(std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
            })?
        } else {
            RegistryDocument::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(RegistryState::from_document(doc)),
        })
    }

    fn persist(&self, state: &RegistryState) -> Result<(), RegistryError> {
        let doc = state.to_document();
        let json = serde_json::to_string_pretty(&doc).expect("registry document always serializes");
        crate::io::write_atomic(&self.path, json).map_err(|e| RegistryError::Infra(e.into()))
    }

    /// Insert a freshly issued certificate record. Fails on duplicate serial.
    pub fn insert(&self, record: CertificateRecord) -> Result<(), RegistryError> {
        let mut state = self.state.write().map_err(|_| RegistryError::Infra(crate::error::InfraError::LockContended))?;
        if state.by_serial.contains_key(&record.serial) {
            return Err(RegistryError::DuplicateSerial);
        }
        let key = KindSubjectKey(record.kind.into(), record.subject_id.clone());
        let serial = record.serial;
        state.by_serial.insert(serial, record);
        state.by_subject.insert(key, serial);
        self.persist(&state)
    }

    /// Mark a certificate revoked. Fails if unknown or already revoked.
    pub fn mark_revoked(
        &self,
        serial: u64,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().map_err(|_| RegistryError::Infra(crate::error::InfraError::LockContended))?;
        let record = state.by_serial.get_mut(&serial).ok_or(RegistryError::Unknown)?;
        if record.status == CertStatus::Revoked {
            return Err(RegistryError::AlreadyRevoked);
        }
        record.status = CertStatus::Revoked;
        record.revoked_at = Some(at);
        record.reason = Some(reason);
        self.persist(&state)
    }

    pub fn lookup_by_serial(&self, serial: u64) -> Option<CertificateRecord> {
        let state = self.state.read().ok()?;
        state.by_serial.get(&serial).cloned()
    }

    /// Returns the active certificate for a subject, if any (revoked
    /// records are retained but not returned here, matching §4.C's
    /// re-issuance rule: "unless the prior certificate has been revoked").
    pub fn active_subject(&self, kind: SubjectKind, subject_id: &str) -> Option<CertificateRecord> {
        let state = self.state.read().ok()?;
        let key = KindSubjectKey(kind.into(), subject_id.to_string());
        let serial = *state.by_subject.get(&key)?;
        let record = state.by_serial.get(&serial)?;
        if record.status == CertStatus::Active {
            Some(record.clone())
        } else {
            None
        }
    }

    pub fn lookup_by_subject(&self, kind: SubjectKind, subject_id: &str) -> Option<CertificateRecord> {
        let state = self.state.read().ok()?;
        let key = KindSubjectKey(kind.into(), subject_id.to_string());
        let serial = *state.by_subject.get(&key)?;
        state.by_serial.get(&serial).cloned()
    }

    /// List all records, optionally filtered to a single kind.
    pub fn list(&self, kind: Option<SubjectKind>) -> Vec<CertificateRecord> {
        let state = match self.state.read() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let mut out: Vec<CertificateRecord> = state
            .by_serial
            .values()
            .filter(|r| kind.map(|k| k.as_str() == r.kind.as_str()).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.serial);
        out
    }
}
