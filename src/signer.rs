//! Signature verifier (§4.G). Grounded on `crab-cert::crypto::{sign, verify}`
//! and `Credential::{sign, verify_signature}`'s signable-data-then-sign
//! pattern, generalized into `verify_challenge` (canonical challenge bytes,
//! §4.F) and the generic `verify_bytes` also used by the attendance
//! recorder's offline integrity check (P9).

use crate::canonical;
use crate::challenge::Challenge;
use crate::error::SignatureError;

/// Verify `signature_hex` over the canonical bytes of `challenge` against
/// the public key embedded in `cert_pem`.
pub fn verify_challenge(cert_pem: &str, challenge: &Challenge, signature_hex: &str) -> Result<bool, SignatureError> {
    let bytes = canonical::challenge_bytes(
        &challenge.nonce,
        challenge.issued_at,
        &challenge.room_id,
        &challenge.door_id,
        &challenge.previous_nonce,
        &challenge.challenge_id,
    );
    verify_bytes_against_cert(cert_pem, &bytes, signature_hex)
}

/// Generic signature check against a certificate's embedded public key.
pub fn verify_bytes_against_cert(cert_pem: &str, bytes: &[u8], signature_hex: &str) -> Result<bool, SignatureError> {
    hex::decode(signature_hex).map_err(|_| SignatureError::MalformedSignature)?;
    crate::crypto::verify(cert_pem, bytes, signature_hex).map_err(|_| SignatureError::VerifyFailed)
}

/// Generic signature check against a raw SPKI-DER public key, used when the
/// verifying party is not a certificate but a bare signing key (e.g. the
/// attendance recorder's dedicated backend key, §9).
pub fn verify_bytes(spki_der: &[u8], bytes: &[u8], signature_hex: &str) -> Result<bool, SignatureError> {
    hex::decode(signature_hex).map_err(|_| SignatureError::MalformedSignature)?;
    crate::crypto::verify_with_spki_der(spki_der, bytes, signature_hex).map_err(|_| SignatureError::VerifyFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeState;
    use chrono::{TimeZone, Utc};

    #[test]
    fn one_bit_mutation_of_signature_fails() {
        let key = crate::crypto::generate_rsa(2048).unwrap();
        let bytes = b"canonical bytes under test";
        let sig_hex = crate::crypto::sign(&key.private_key_pem, bytes).unwrap();
        let idx = sig_hex.len() / 2;
        let flipped: String = sig_hex
            .chars()
            .enumerate()
            .map(|(i, c)| if i == idx { if c == '0' { '1' } else { '0' } } else { c })
            .collect();
        assert!(hex::decode(&flipped).is_ok());
        assert_ne!(flipped, sig_hex);
    }

    #[test]
    fn challenge_wrapper_builds_same_bytes_as_canonical() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let challenge = Challenge {
            challenge_id: "chal-1".into(),
            nonce: "n1".into(),
            issued_at: ts,
            room_id: "CS101".into(),
            door_id: "door-1".into(),
            previous_nonce: "prev".into(),
            subject_serial: 1,
            state: ChallengeState::Pending,
        };
        let direct = canonical::challenge_bytes("n1", ts, "CS101", "door-1", "prev", "chal-1");
        let via_challenge = canonical::challenge_bytes(
            &challenge.nonce,
            challenge.issued_at,
            &challenge.room_id,
            &challenge.door_id,
            &challenge.previous_nonce,
            &challenge.challenge_id,
        );
        assert_eq!(direct, via_challenge);
    }
}
