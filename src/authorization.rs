//! Authorization store (§4.H). Grounded on `crab-cloud::db::activations`'s
//! `sqlx::query_as::<_, T>` runtime-checked style, swapped from the
//! teacher's `PgPool` to a local `SqlitePool` per SPEC_FULL.md's storage
//! note. Tables `room_authorizations` and `student_enrollments`, the latter
//! materializing into the former on insert exactly as §4.H specifies.

use crate::error::{AuthorizationError, InfraError};
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Authorization {
    pub student_id: String,
    pub room_id: String,
    pub start_time_secs: Option<i64>,
    pub end_time_secs: Option<i64>,
}

pub struct AuthorizationStore {
    pool: SqlitePool,
}

impl AuthorizationStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, InfraError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS room_authorizations (
                student_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                start_time_secs INTEGER,
                end_time_secs INTEGER,
                UNIQUE(student_id, room_id)
            )",
        )
        .execute(&pool)
        .await
        .map_err(sqlx_to_infra)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS student_enrollments (
                student_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                UNIQUE(student_id, course_id, room_id)
            )",
        )
        .execute(&pool)
        .await
        .map_err(sqlx_to_infra)?;

        Ok(Self { pool })
    }

    /// Grant `student_id` access to `room_id`, optionally restricted to a
    /// daily wall-clock window. Duplicate grants are deduplicated on insert
    /// (`INSERT OR IGNORE` backstops the `UNIQUE(student_id, room_id)`
    /// constraint).
    pub async fn authorize(
        &self,
        student_id: &str,
        room_id: &str,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<(), InfraError> {
        sqlx::query(
            "INSERT OR IGNORE INTO room_authorizations
                (student_id, room_id, start_time_secs, end_time_secs)
             VALUES (?, ?, ?, ?)",
        )
        .bind(student_id)
        .bind(room_id)
        .bind(start_time.map(seconds_of_day))
        .bind(end_time.map(seconds_of_day))
        .execute(&self.pool)
        .await
        .map_err(sqlx_to_infra)?;
        Ok(())
    }

    /// Record a course enrollment; materializes into a room authorization
    /// with no time window, per §4.H.
    pub async fn enroll(&self, student_id: &str, course_id: &str, room_id: &str) -> Result<(), InfraError> {
        sqlx::query(
            "INSERT OR IGNORE INTO student_enrollments (student_id, course_id, room_id)
             VALUES (?, ?, ?)",
        )
        .bind(student_id)
        .bind(course_id)
        .bind(room_id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_to_infra)?;

        self.authorize(student_id, room_id, None, None).await
    }

    /// True iff `student_id` has a matching authorization row for
    /// `room_id` and, if a time window is present, `now`'s local
    /// time-of-day falls within it.
    pub async fn is_authorized(
        &self,
        student_id: &str,
        room_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthorizationError> {
        let rows: Vec<Authorization> = sqlx::query_as::<_, Authorization>(
            "SELECT student_id, room_id, start_time_secs, end_time_secs
             FROM room_authorizations WHERE student_id = ? AND room_id = ?",
        )
        .bind(student_id)
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| AuthorizationError::NotAuthorizedForRoom)?;

        if rows.is_empty() {
            return Err(AuthorizationError::NotAuthorizedForRoom);
        }

        let now_secs = seconds_of_day(now.time());
        let in_window = rows.iter().any(|row| match (row.start_time_secs, row.end_time_secs) {
            (Some(start), Some(end)) => now_secs >= start && now_secs <= end,
            (Some(start), None) => now_secs >= start,
            (None, Some(end)) => now_secs <= end,
            (None, None) => true,
        });

        if in_window {
            Ok(true)
        } else {
            Err(AuthorizationError::OutsideAccessWindow)
        }
    }
}

fn seconds_of_day(t: NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64
}

fn sqlx_to_infra(e: sqlx::Error) -> InfraError {
    InfraError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
