//! CRL manager (§4.D). New module: the teacher has no CRL-building code of
//! its own, so this is grounded on `rcgen`'s revocation-list support (the
//! same crate `crab-cert::ca` already uses for issuance) for building and
//! signing, and on `crab-cert::trust::verify_ca_signature`'s DER-parsing
//! style for reading one back.

use crate::ca::CaCore;
use crate::error::{CrlError, InfraError};
use crate::registry::RevocationReason;
use chrono::{DateTime, Utc};
use rcgen::{CertificateRevocationListParams, RevokedCertParams, SerialNumber};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy)]
struct RevocationEntry {
    revoked_at: DateTime<Utc>,
    reason: RevocationReason,
}

struct CrlState {
    revoked: HashMap<u64, RevocationEntry>,
}

/// Maintains the revocation set and produces a CA-signed CRL on demand.
pub struct CrlManager {
    path: PathBuf,
    validity_days: u32,
    state: RwLock<CrlState>,
}

// A small JSON document, independent of the certificate registry's shape;
// the CRL's revocation set is conceptually separate persisted state (§9:
// "three independent stores, no shared mutable graph").
mod persist {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    pub struct Document {
        pub entries: Vec<Entry>,
    }

    #[derive(Serialize, Deserialize)]
    pub struct Entry {
        pub serial: u64,
        pub revoked_at: DateTime<Utc>,
        pub reason: RevocationReason,
    }
}

impl CrlManager {
    pub fn load(path: PathBuf, validity_days: u32) -> Result<Self, CrlError> {
        let revoked = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| CrlError::Infra(e.into()))?;
            let doc: persist::Document = serde_json::from_str(&raw).map_err(|e| {
                CrlError::Infra(std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
            })?;
            doc.entries
                .into_iter()
                .map(|e| {
                    (
                        e.serial,
                        RevocationEntry {
                            revoked_at: e.revoked_at,
                            reason: e.reason,
                        },
                    )
                })
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            validity_days,
            state: RwLock::new(CrlState { revoked }),
        })
    }

    fn persist(&self, state: &CrlState) -> Result<(), CrlError> {
        let doc = persist::Document {
            entries: state
                .revoked
                .iter()
                .map(|(serial, e)| persist::Entry {
                    serial: *serial,
                    revoked_at: e.revoked_at,
                    reason: e.reason,
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&doc).expect("CRL document always serializes");
        crate::io::write_atomic(&self.path, json).map_err(|e| CrlError::Infra(e.into()))
    }

    /// Add a revocation entry. Idempotent — a serial already revoked is a
    /// no-op.
    pub fn revoke(&self, serial: u64, reason_code: &str, at: DateTime<Utc>) -> Result<(), CrlError> {
        let reason = RevocationReason::from_str(reason_code).ok_or(CrlError::UnknownReason)?;
        let mut state = self
            .state
            .write()
            .map_err(|_| CrlError::Infra(InfraError::LockContended))?;
        state.revoked.entry(serial).or_insert(RevocationEntry {
            revoked_at: at,
            reason,
        });
        self.persist(&state)
    }

    pub fn is_revoked(&self, serial: u64) -> bool {
        self.state
            .read()
            .map(|s| s.revoked.contains_key(&serial))
            .unwrap_or(true) // fail closed: a lock failure must not look like "clean"
    }

    pub fn revocation_set(&self) -> Vec<(u64, DateTime<Utc>, RevocationReason)> {
        self.state
            .read()
            .map(|s| {
                s.revoked
                    .iter()
                    .map(|(serial, e)| (*serial, e.revoked_at, e.reason))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Build a fresh CA-signed CRL PEM with `this_update = now` and
    /// `next_update = now + crl_validity_days`, per §4.D's literal
    /// contract. CRL signing is not a hot path (§5), so this is never
    /// cached — a cache keyed only on `revoke()` would silently hand back
    /// a CRL whose `next_update` has already passed once enough time
    /// elapses with no new revocations in between.
    pub fn current_crl(&self, ca: &CaCore, now: DateTime<Utc>) -> Result<String, CrlError> {
        let state = self
            .state
            .read()
            .map_err(|_| CrlError::Infra(InfraError::LockContended))?;

        let revoked_certs: Vec<RevokedCertParams> = state
            .revoked
            .iter()
            .map(|(serial, entry)| RevokedCertParams {
                serial_number: SerialNumber::from_slice(&serial.to_be_bytes()),
                revocation_time: to_time(entry.revoked_at),
                reason_code: Some(to_rcgen_reason(entry.reason)),
                invalidity_date: None,
            })
            .collect();

        let crl_number = SerialNumber::from_slice(&now.timestamp().to_be_bytes());
        let params = CertificateRevocationListParams {
            this_update: to_time(now),
            next_update: to_time(now + chrono::Duration::days(self.validity_days as i64)),
            crl_number,
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: rcgen::KeyIdMethod::Sha256,
        };

        ca.sign_crl(params)
    }
}

/// Convert a logical-clock reading into the `time::OffsetDateTime` rcgen's
/// types want, clamping to the Unix epoch on an out-of-range timestamp.
/// Shared with `profile::create_ca_params`/`create_cert_params`, the other
/// place rcgen needs this conversion.
pub(crate) fn to_time(ts: DateTime<Utc>) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp(ts.timestamp())
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
}

fn to_rcgen_reason(reason: RevocationReason) -> rcgen::RevocationReason {
    match reason {
        RevocationReason::Unspecified => rcgen::RevocationReason::Unspecified,
        RevocationReason::KeyCompromise => rcgen::RevocationReason::KeyCompromise,
        RevocationReason::Superseded => rcgen::RevocationReason::Superseded,
        RevocationReason::CessationOfOperation => rcgen::RevocationReason::CessationOfOperation,
    }
}

/// Parse a CA-signed CRL PEM back into the set of revoked serials, for P4's
/// round-trip property. Reads the serial of each entry; reason codes and
/// timestamps for externally-supplied CRLs are outside this system's trust
/// boundary and are not re-derived here — the authoritative reason/timestamp
/// pairing lives in the persisted revocation set this manager owns.
pub fn parse_crl_serials(crl_pem: &str) -> Result<Vec<u64>, CrlError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(crl_pem.as_bytes())
        .map_err(|e| CrlError::Infra(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()).into()))?;
    let (_, crl) = x509_parser::revocation_list::CertificateRevocationList::from_der(&pem.contents)
        .map_err(|e| CrlError::Infra(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()).into()))?;

    let mut out = Vec::new();
    for entry in crl.iter_revoked_certificates() {
        let serial_bytes = entry.raw_serial();
        let mut buf = [0u8; 8];
        let len = serial_bytes.len().min(8);
        buf[8 - len..].copy_from_slice(&serial_bytes[serial_bytes.len() - len..]);
        out.push(u64::from_be_bytes(buf));
    }
    Ok(out)
}
