//! Canonical byte encodings used as signing/hashing input (§4.F, §6).
//!
//! These are hand-written, fixed-key-order serializers — never
//! `serde_json::to_vec` on a derived struct — because the wire contract is
//! frozen and a general JSON library's default field order is not a
//! guarantee (§9, "canonicalization fragility").

use chrono::{DateTime, SecondsFormat, Utc};

fn json_escape(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn iso8601_micros(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Canonical bytes for a challenge, in the frozen key order
/// `[nonce, timestamp, room_id, door_id, previous_nonce, challenge_id]`.
pub fn challenge_bytes(
    nonce: &str,
    timestamp: DateTime<Utc>,
    room_id: &str,
    door_id: &str,
    previous_nonce: &str,
    challenge_id: &str,
) -> Vec<u8> {
    let mut out = String::from("{");
    out.push_str("\"nonce\":");
    json_escape(nonce, &mut out);
    out.push_str(",\"timestamp\":");
    json_escape(&iso8601_micros(timestamp), &mut out);
    out.push_str(",\"room_id\":");
    json_escape(room_id, &mut out);
    out.push_str(",\"door_id\":");
    json_escape(door_id, &mut out);
    out.push_str(",\"previous_nonce\":");
    json_escape(previous_nonce, &mut out);
    out.push_str(",\"challenge_id\":");
    json_escape(challenge_id, &mut out);
    out.push('}');
    out.into_bytes()
}

/// Canonical bytes for an attendance record, keys in lexicographic order:
/// `door_id, room_id, student_id, timestamp`.
pub fn attendance_record_bytes(
    student_id: &str,
    room_id: &str,
    door_id: &str,
    timestamp: DateTime<Utc>,
) -> Vec<u8> {
    let mut out = String::from("{");
    out.push_str("\"door_id\":");
    json_escape(door_id, &mut out);
    out.push_str(",\"room_id\":");
    json_escape(room_id, &mut out);
    out.push_str(",\"student_id\":");
    json_escape(student_id, &mut out);
    out.push_str(",\"timestamp\":");
    json_escape(&iso8601_micros(timestamp), &mut out);
    out.push('}');
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn challenge_bytes_are_deterministic() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let a = challenge_bytes("n1", ts, "CS101", "door-1", "prev", "chal-1");
        let b = challenge_bytes("n1", ts, "CS101", "door-1", "prev", "chal-1");
        assert_eq!(a, b);
        assert!(std::str::from_utf8(&a).unwrap().starts_with("{\"nonce\":\"n1\""));
    }

    #[test]
    fn attendance_bytes_are_lexicographic() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let bytes = attendance_record_bytes("student_001", "CS101", "door_001", ts);
        let s = std::str::from_utf8(&bytes).unwrap();
        assert!(s.starts_with("{\"door_id\""));
        let door_pos = s.find("door_id").unwrap();
        let room_pos = s.find("room_id").unwrap();
        let student_pos = s.find("student_id").unwrap();
        let ts_pos = s.find("timestamp").unwrap();
        assert!(door_pos < room_pos);
        assert!(room_pos < student_pos);
        assert!(student_pos < ts_pos);
    }
}
