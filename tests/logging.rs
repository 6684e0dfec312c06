//! Logging invariant from SPEC_FULL.md [LOGGING]: denial paths log the
//! classified error kind and relevant identifiers, but no private key
//! material, signature bytes, or raw PEM ever reaches a log line.

use chrono::{DateTime, Utc};
use secureattend_core::config::Config;
use secureattend_core::Core;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

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

#[derive(Clone, Default)]
struct CapturingWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturingWriter {
    type Writer = CapturingWriter;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Drives a revoked-certificate denial (a `tracing::warn!` path per
/// [LOGGING]) with a subscriber capturing into memory, then asserts the
/// captured text never contains `PRIVATE KEY` or the issued private key's
/// PEM body.
#[tokio::test]
async fn denial_path_logging_never_leaks_key_material() {
    let dir = tempfile::tempdir().unwrap();
    let now = base_now();
    let core = Core::init(test_config(dir.path()), now).await.unwrap();

    let (student_cert, student_key) = core.issue_student("student_001", None, now).unwrap();
    let record = core
        .registry()
        .lookup_by_subject(secureattend_core::SubjectKind::Student, "student_001")
        .unwrap();
    core.revoke(record.serial, "key_compromise", now).unwrap();

    let writer = CapturingWriter::default();
    let buf = writer.0.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let _ = core.validate(&student_cert, secureattend_core::SubjectKind::Student, now);
    });

    let logged = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(logged.contains("Revoked") || logged.contains("revoked"));
    assert!(!logged.contains("PRIVATE KEY"));
    assert!(!logged.contains(&student_key));
    assert!(!logged.contains(&student_cert));
}
