//! End-to-end scenarios from spec §8, wired through [`Core`] exactly as
//! the "Access flow as a state machine" diagram describes: validate →
//! generate → client signs → validate → consume → verify → authorize →
//! record.

use chrono::{DateTime, Duration, Utc};
use secureattend_core::config::Config;
use secureattend_core::error::{
    AuthorizationError, CertError, ChallengeError, CoreError, IssueError, SignatureError,
};
use secureattend_core::{Core, SubjectKind};

fn test_config(base: &std::path::Path) -> Config {
    Config {
        ca_dir: base.join("ca"),
        certs_dir: base.join("certs"),
        db_path: base.join("secureattend.sqlite3"),
        ..Config::default()
    }
}

fn base_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-15T09:00:00Z").unwrap().with_timezone(&Utc)
}

async fn fresh_core(dir: &tempfile::TempDir) -> Core {
    Core::init(test_config(dir.path()), base_now()).await.unwrap()
}

fn sign_challenge(student_key_pem: &str, challenge: &secureattend_core::challenge::Challenge) -> String {
    let bytes = secureattend_core::canonical::challenge_bytes(
        &challenge.nonce,
        challenge.issued_at,
        &challenge.room_id,
        &challenge.door_id,
        &challenge.previous_nonce,
        &challenge.challenge_id,
    );
    secureattend_core::crypto::sign(student_key_pem, &bytes).unwrap()
}

/// Scenario 1: happy path.
#[tokio::test]
async fn happy_path_grants_access_and_records_attendance() {
    let dir = tempfile::tempdir().unwrap();
    let core = fresh_core(&dir).await;
    let now = base_now();

    let (student_cert, student_key) = core.issue_student("student_001", None, now).unwrap();
    core.authorize("student_001", "CS101", None, None).await.unwrap();

    let challenge = core
        .begin_access(&student_cert, "aa".repeat(32).as_str(), "CS101", "door_001", now)
        .unwrap();
    let sig = sign_challenge(&student_key, &challenge);

    let grant = core
        .complete_access(&student_cert, &challenge.nonce, &sig, "student_001", "CS101", "door_001", now)
        .await
        .unwrap();

    assert_eq!(grant.attendance.student_id, "student_001");
    assert_eq!(grant.attendance.room_id, "CS101");

    let rows = core
        .query_attendance(&secureattend_core::attendance::AttendanceFilter {
            student_id: Some("student_001".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

/// Scenario 2: replay of a prior QR nonce within the replay window.
#[tokio::test]
async fn replayed_previous_nonce_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let core = fresh_core(&dir).await;
    let now = base_now();

    let (student_cert, _student_key) = core.issue_student("student_001", None, now).unwrap();
    let prev = "aa".repeat(32);

    core.begin_access(&student_cert, &prev, "CS101", "door_001", now).unwrap();

    let err = core
        .begin_access(&student_cert, &prev, "CS101", "door_001", now + Duration::seconds(5))
        .unwrap_err();
    assert!(matches!(err, CoreError::Challenge(ChallengeError::ReplayedQr)));
}

/// Scenario 3: a challenge that has aged past its TTL is rejected and no
/// attendance record is written.
#[tokio::test]
async fn expired_challenge_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let core = fresh_core(&dir).await;
    let t0 = base_now();

    let (student_cert, student_key) = core.issue_student("student_001", None, t0).unwrap();
    core.authorize("student_001", "CS101", None, None).await.unwrap();

    let challenge = core
        .begin_access(&student_cert, &"aa".repeat(32), "CS101", "door_001", t0)
        .unwrap();
    let sig = sign_challenge(&student_key, &challenge);

    let t1 = t0 + Duration::seconds(31);
    let err = core
        .complete_access(&student_cert, &challenge.nonce, &sig, "student_001", "CS101", "door_001", t1)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Challenge(ChallengeError::ChallengeExpired)));

    let rows = core
        .query_attendance(&secureattend_core::attendance::AttendanceFilter::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

/// Scenario 4: a revoked certificate is denied both at challenge time and
/// at verify time against a pre-obtained challenge.
#[tokio::test]
async fn revoked_certificate_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let core = fresh_core(&dir).await;
    let now = base_now();

    let (student_cert, student_key) = core.issue_student("student_001", None, now).unwrap();
    core.authorize("student_001", "CS101", None, None).await.unwrap();

    let challenge = core
        .begin_access(&student_cert, &"aa".repeat(32), "CS101", "door_001", now)
        .unwrap();
    let sig = sign_challenge(&student_key, &challenge);

    let record = core.registry().lookup_by_subject(SubjectKind::Student, "student_001").unwrap();
    core.revoke(record.serial, "key_compromise", now + Duration::seconds(1)).unwrap();

    let err = core
        .begin_access(&student_cert, &"bb".repeat(32), "CS101", "door_001", now + Duration::seconds(2))
        .unwrap_err();
    assert!(matches!(err, CoreError::Cert(CertError::Revoked)));

    let err = core
        .complete_access(
            &student_cert,
            &challenge.nonce,
            &sig,
            "student_001",
            "CS101",
            "door_001",
            now + Duration::seconds(2),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Cert(CertError::Revoked)));
}

/// Scenario 5: a one-bit tamper of the signature is caught.
#[tokio::test]
async fn tampered_signature_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let core = fresh_core(&dir).await;
    let now = base_now();

    let (student_cert, student_key) = core.issue_student("student_001", None, now).unwrap();
    core.authorize("student_001", "CS101", None, None).await.unwrap();

    let challenge = core
        .begin_access(&student_cert, &"aa".repeat(32), "CS101", "door_001", now)
        .unwrap();
    let mut sig = sign_challenge(&student_key, &challenge);
    let idx = sig.len() / 2;
    let flipped = sig.chars().nth(idx).map(|c| if c == '0' { '1' } else { '0' }).unwrap();
    sig.replace_range(idx..idx + 1, &flipped.to_string());

    let err = core
        .complete_access(&student_cert, &challenge.nonce, &sig, "student_001", "CS101", "door_001", now)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Signature(SignatureError::VerifyFailed)));

    let rows = core
        .query_attendance(&secureattend_core::attendance::AttendanceFilter::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

/// Scenario 6: a student with no authorization for the room is denied,
/// without writing an attendance row.
#[tokio::test]
async fn unauthorized_room_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let core = fresh_core(&dir).await;
    let now = base_now();

    let (student_cert, student_key) = core.issue_student("student_002", None, now).unwrap();

    let challenge = core
        .begin_access(&student_cert, &"aa".repeat(32), "CS101", "door_001", now)
        .unwrap();
    let sig = sign_challenge(&student_key, &challenge);

    let err = core
        .complete_access(&student_cert, &challenge.nonce, &sig, "student_002", "CS101", "door_001", now)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Authorization(AuthorizationError::NotAuthorizedForRoom)
    ));

    let rows = core
        .query_attendance(&secureattend_core::attendance::AttendanceFilter::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

/// A valid ASCII email is accepted and embedded as a SAN without error.
#[tokio::test]
async fn issue_student_with_valid_email_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let core = fresh_core(&dir).await;
    let now = base_now();

    let (cert_pem, _key) = core
        .issue_student("student_003", Some("student_003@example.com".to_string()), now)
        .unwrap();
    let info = core.validate(&cert_pem, SubjectKind::Student, now).unwrap();
    assert_eq!(info.subject_id, "student_003");
}

/// A non-ASCII email cannot be encoded as an IA5 rfc822Name SAN; this must
/// be classified as `IssueError::CryptoFailed`, never a panic.
#[tokio::test]
async fn issue_student_with_non_ascii_email_is_classified_not_panicked() {
    let dir = tempfile::tempdir().unwrap();
    let core = fresh_core(&dir).await;
    let now = base_now();

    let err = core
        .issue_student("student_004", Some("José@example.com".to_string()), now)
        .unwrap_err();
    assert!(matches!(err, IssueError::CryptoFailed(_)));

    // No certificate record was left behind by the rejected issuance.
    assert!(core
        .registry()
        .lookup_by_subject(SubjectKind::Student, "student_004")
        .is_none());
}

/// `Core::issue_server` exists (mirroring `issue_student`/`issue_door`) and
/// wires `Config::server_validity_days` through to the issued record rather
/// than silently reusing another kind's default.
#[tokio::test]
async fn issue_server_wires_configured_validity() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.server_validity_days = 42;
    let now = base_now();
    let core = Core::init(cfg, now).await.unwrap();

    let (cert_pem, _key) = core.issue_server("attendance-backend", now).unwrap();
    let info = core.validate(&cert_pem, SubjectKind::Server, now).unwrap();

    let record = core.registry().lookup_by_serial(info.serial).unwrap();
    assert_eq!(record.not_after, now + Duration::days(42));
}

/// A row with only a `start_time` set enforces that lower bound rather than
/// being treated as unrestricted; one with only an `end_time` enforces the
/// upper bound.
#[tokio::test]
async fn half_open_authorization_window_enforces_the_bound_present() {
    let dir = tempfile::tempdir().unwrap();
    let core = fresh_core(&dir).await;

    core.authorize(
        "student_005",
        "CS101",
        Some(chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap()),
        None,
    )
    .await
    .unwrap();

    // base_now() is 09:00:00Z, before the 10:00:00 start bound.
    let err = core.authorization.is_authorized("student_005", "CS101", base_now()).await.unwrap_err();
    assert!(matches!(err, AuthorizationError::OutsideAccessWindow));

    let after_start = base_now() + Duration::hours(2);
    assert!(core
        .authorization
        .is_authorized("student_005", "CS101", after_start)
        .await
        .unwrap());

    core.authorize(
        "student_006",
        "CS101",
        None,
        Some(chrono::NaiveTime::from_hms_opt(8, 0, 0).unwrap()),
    )
    .await
    .unwrap();

    // base_now() is 09:00:00Z, after the 08:00:00 end bound.
    let err = core.authorization.is_authorized("student_006", "CS101", base_now()).await.unwrap_err();
    assert!(matches!(err, AuthorizationError::OutsideAccessWindow));
}

#[tokio::test]
async fn ca_init_is_idempotent_across_reload() {
    let dir = tempfile::tempdir().unwrap();
    let now = base_now();
    let cert_pem_1 = {
        let core = fresh_core(&dir).await;
        core.ca.cert_pem().to_string()
    };
    let cert_pem_2 = {
        let core = Core::init(test_config(dir.path()), now).await.unwrap();
        core.ca.cert_pem().to_string()
    };
    assert_eq!(cert_pem_1, cert_pem_2);
}
