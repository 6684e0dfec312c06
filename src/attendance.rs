//! Attendance recorder (§4.I). Grounded on
//! `crab-cert::credential::Credential`'s sign-then-store pattern,
//! generalized from a single signed credential file to a persisted,
//! queryable table, and on `crab-cloud::db::activations`'s
//! `sqlx::query_as::<_, T>` runtime-checked style.

use crate::canonical;
use crate::crypto;
use crate::error::{InfraError, RecordingError};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub room_id: String,
    pub door_id: String,
    pub timestamp: DateTime<Utc>,
    pub record_hash: String,
    pub backend_signature: String,
}

#[derive(Debug, Default, Clone)]
pub struct AttendanceFilter {
    pub student_id: Option<String>,
    pub room_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Signs and persists attendance records. Owns no CA material — the
/// signing key it is handed at construction is a dedicated backend key
/// (§9's open question resolved in DESIGN.md: issued separately from the
/// CA key so the CA's key is never used for routine online signing).
pub struct AttendanceRecorder {
    pool: SqlitePool,
    signing_key_pem: String,
    backend_spki_der: Vec<u8>,
}

impl AttendanceRecorder {
    pub async fn new(
        pool: SqlitePool,
        signing_key_pem: String,
        backend_spki_der: Vec<u8>,
    ) -> Result<Self, InfraError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS attendance_records (
                student_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                door_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                record_hash TEXT NOT NULL,
                backend_signature TEXT NOT NULL,
                UNIQUE(student_id, room_id, timestamp)
            )",
        )
        .execute(&pool)
        .await
        .map_err(sqlx_to_infra)?;

        Ok(Self {
            pool,
            signing_key_pem,
            backend_spki_der,
        })
    }

    /// Build the canonical bytes, hash, sign, and persist an attendance
    /// record for `(student_id, room_id, door_id, timestamp)`. Rejects a
    /// duplicate `(student_id, room_id, timestamp)` triple as
    /// `DuplicateRecord` (P10), backstopped by the table's `UNIQUE`
    /// constraint per §5.
    pub async fn record(
        &self,
        student_id: &str,
        room_id: &str,
        door_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<AttendanceRecord, RecordingError> {
        let bytes = canonical::attendance_record_bytes(student_id, room_id, door_id, timestamp);
        let record_hash = hex::encode(crypto::sha256(&bytes));
        let backend_signature = crypto::sign(&self.signing_key_pem, record_hash.as_bytes())
            .map_err(|e| RecordingError::PersistFailed(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO attendance_records
                (student_id, room_id, door_id, timestamp, record_hash, backend_signature)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(student_id)
        .bind(room_id)
        .bind(door_id)
        .bind(timestamp.to_rfc3339())
        .bind(&record_hash)
        .bind(&backend_signature)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(AttendanceRecord {
                student_id: student_id.to_string(),
                room_id: room_id.to_string(),
                door_id: door_id.to_string(),
                timestamp,
                record_hash,
                backend_signature,
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RecordingError::DuplicateRecord)
            }
            Err(e) => Err(RecordingError::PersistFailed(e.to_string())),
        }
    }

    /// Query stored records by the optional filters of §4.I, ordered by
    /// `timestamp` descending.
    pub async fn query(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>, RecordingError> {
        let mut sql = String::from(
            "SELECT student_id, room_id, door_id, timestamp, record_hash, backend_signature
             FROM attendance_records WHERE 1=1",
        );
        if filter.student_id.is_some() {
            sql.push_str(" AND student_id = ?");
        }
        if filter.room_id.is_some() {
            sql.push_str(" AND room_id = ?");
        }
        if filter.from.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filter.to.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query_as::<_, AttendanceRecord>(&sql);
        if let Some(s) = &filter.student_id {
            query = query.bind(s);
        }
        if let Some(r) = &filter.room_id {
            query = query.bind(r);
        }
        if let Some(f) = filter.from {
            query = query.bind(f.to_rfc3339());
        }
        if let Some(t) = filter.to {
            query = query.bind(t.to_rfc3339());
        }
        if let Some(l) = filter.limit {
            query = query.bind(l);
        }

        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RecordingError::PersistFailed(e.to_string()))
    }

    /// Re-verify a stored record's integrity offline (P9): recompute the
    /// canonical hash and check the backend signature against the
    /// recorder's public key.
    pub fn verify_integrity(&self, record: &AttendanceRecord) -> bool {
        let bytes = canonical::attendance_record_bytes(
            &record.student_id,
            &record.room_id,
            &record.door_id,
            record.timestamp,
        );
        let expected_hash = hex::encode(crypto::sha256(&bytes));
        if expected_hash != record.record_hash {
            return false;
        }
        crate::signer::verify_bytes(&self.backend_spki_der, record.record_hash.as_bytes(), &record.backend_signature)
            .unwrap_or(false)
    }
}

fn sqlx_to_infra(e: sqlx::Error) -> InfraError {
    InfraError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
