//! Certificate validator (§4.E). Grounded on
//! `crab-cert::trust::{verify_ca_signature, verify_chain_against_root}` for
//! the TBS-extraction-then-verify approach, and on
//! `crab-cert::metadata::CertMetadata` for the extension-extraction style,
//! generalized into the exact nine-step short-circuiting pipeline §4.E
//! names, each step mapped to one named [`CertError`] variant instead of
//! the teacher's single `VerificationFailed(String)`.

use crate::ca::CaCore;
use crate::crl::CrlManager;
use crate::error::CertError;
use crate::profile::SubjectKind;
use chrono::{DateTime, Utc};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{ExtendedKeyUsage, GeneralName, KeyUsage, ParsedExtension, X509Extension};
use x509_parser::oid_registry::{
    Oid, OID_X509_COMMON_NAME, OID_X509_EXT_BASIC_CONSTRAINTS, OID_X509_EXT_EXTENDED_KEY_USAGE,
    OID_X509_EXT_KEY_USAGE, OID_X509_EXT_SUBJECT_ALT_NAME,
};

/// Read-only view of a validated certificate's subject, returned on a
/// successful [`validate`] call.
#[derive(Debug, Clone)]
pub struct SubjectInfo {
    pub kind: SubjectKind,
    pub subject_id: String,
    pub serial: u64,
    pub spki_der: Vec<u8>,
    pub room_id: Option<String>,
}

/// Run the nine-step validation pipeline of §4.E against `cert_pem`.
///
/// Checks short-circuit in the documented order because each later check
/// depends on the certificate having already parsed, being issued by this
/// CA, and carrying a genuine signature — validating extensions on a
/// forged certificate would be meaningless.
pub fn validate(
    cert_pem: &str,
    expected_kind: SubjectKind,
    ca: &CaCore,
    crl: &CrlManager,
    now: DateTime<Utc>,
) -> Result<SubjectInfo, CertError> {
    // 1. Parse
    let (_, pem) =
        x509_parser::pem::parse_x509_pem(cert_pem.as_bytes()).map_err(|_| CertError::BadEncoding)?;
    let (_, cert) =
        x509_parser::parse_x509_certificate(&pem.contents).map_err(|_| CertError::BadEncoding)?;

    // 2. Issuer match: issuer DN equals the CA's subject DN.
    let (_, ca_pem) = x509_parser::pem::parse_x509_pem(ca.cert_pem().as_bytes())
        .map_err(|_| CertError::BadEncoding)?;
    let (_, ca_cert) =
        x509_parser::parse_x509_certificate(&ca_pem.contents).map_err(|_| CertError::BadEncoding)?;
    if common_name(cert.issuer()) != common_name(ca_cert.subject()) {
        return Err(CertError::UntrustedIssuer);
    }

    // 3. Signature: the cert's TBS bytes must verify against the CA's key.
    let tbs_bytes = extract_tbs_bytes(&pem.contents).ok_or(CertError::BadEncoding)?;
    let sig_hex = hex::encode(cert.signature_value.as_ref());
    let sig_ok =
        crate::crypto::verify(ca.cert_pem(), tbs_bytes, &sig_hex).map_err(|_| CertError::InvalidSignature)?;
    if !sig_ok {
        return Err(CertError::InvalidSignature);
    }

    // 4. Validity window.
    let not_before = cert.validity().not_before.to_datetime();
    let not_after = cert.validity().not_after.to_datetime();
    let now_offset = time::OffsetDateTime::from_unix_timestamp(now.timestamp())
        .map_err(|_| CertError::BadEncoding)?;
    if now_offset < not_before {
        return Err(CertError::NotYetValid);
    }
    if now_offset > not_after {
        return Err(CertError::Expired);
    }

    // 5. Revocation.
    let serial = serial_u64(&cert);
    if crl.is_revoked(serial) {
        return Err(CertError::Revoked);
    }

    // 6. BasicConstraints: must be present and CA=false for an end-entity.
    let basic_constraints = find_extension(&cert, &OID_X509_EXT_BASIC_CONSTRAINTS)
        .and_then(|ext| match ext.parsed_extension() {
            ParsedExtension::BasicConstraints(bc) => Some(bc),
            _ => None,
        })
        .ok_or(CertError::InvalidExtension)?;
    if basic_constraints.ca {
        return Err(CertError::InvalidExtension);
    }

    // 7. KeyUsage: must include digitalSignature.
    let key_usage = find_extension(&cert, &OID_X509_EXT_KEY_USAGE)
        .and_then(|ext| match ext.parsed_extension() {
            ParsedExtension::KeyUsage(ku) => Some(ku),
            _ => None,
        })
        .ok_or(CertError::InvalidKeyUsage)?;
    if !has_digital_signature(key_usage) {
        return Err(CertError::InvalidKeyUsage);
    }

    // 8. ExtendedKeyUsage: students and doors must carry clientAuth.
    if matches!(expected_kind, SubjectKind::Student | SubjectKind::Door) {
        let eku = find_extension(&cert, &OID_X509_EXT_EXTENDED_KEY_USAGE)
            .and_then(|ext| match ext.parsed_extension() {
                ParsedExtension::ExtendedKeyUsage(eku) => Some(eku),
                _ => None,
            })
            .ok_or(CertError::InvalidExtendedKeyUsage)?;
        if !has_client_auth(eku) {
            return Err(CertError::InvalidExtendedKeyUsage);
        }
    }

    // 9. Kind match — derived from the registry rather than re-parsed from
    // custom cert extensions, since §3 ties `kind` to the registry record.
    let record = ca
        .registry()
        .lookup_by_serial(serial)
        .ok_or(CertError::KindMismatch)?;
    if record.kind.as_str() != expected_kind.as_str() {
        return Err(CertError::KindMismatch);
    }

    let room_id = room_id_from_san(&cert);
    let spki_der = cert.tbs_certificate.subject_pki.subject_public_key.data.to_vec();

    Ok(SubjectInfo {
        kind: record.kind,
        subject_id: record.subject_id,
        serial,
        spki_der,
        room_id,
    })
}

fn common_name(name: &x509_parser::x509::X509Name) -> Option<String> {
    for rdn in name.iter_rdn() {
        for attr in rdn.iter() {
            if attr.attr_type() == &OID_X509_COMMON_NAME {
                return attr.as_str().ok().map(|s| s.to_string());
            }
        }
    }
    None
}

fn find_extension<'a>(cert: &'a X509Certificate<'a>, oid: &Oid) -> Option<&'a X509Extension<'a>> {
    cert.extensions().iter().find(|ext| &ext.oid == oid)
}

fn has_digital_signature(ku: &KeyUsage) -> bool {
    ku.digital_signature()
}

fn has_client_auth(eku: &ExtendedKeyUsage) -> bool {
    eku.client_auth
}

fn room_id_from_san(cert: &X509Certificate<'_>) -> Option<String> {
    let ext = find_extension(cert, &OID_X509_EXT_SUBJECT_ALT_NAME)?;
    let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() else {
        return None;
    };
    for name in &san.general_names {
        if let GeneralName::DNSName(dns) = name {
            if let Some(room) = dns.strip_prefix("room-").and_then(|s| s.split('.').next()) {
                return Some(room.to_string());
            }
        }
    }
    None
}

fn serial_u64(cert: &X509Certificate<'_>) -> u64 {
    let bytes = cert.tbs_certificate.raw_serial();
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    u64::from_be_bytes(buf)
}

/// Extract the DER bytes of the TBSCertificate (the first element of the
/// outer `SEQUENCE { tbsCertificate, signatureAlgorithm, signatureValue }`),
/// grounded on `crab-cert::trust::extract_tbs_bytes`.
fn extract_tbs_bytes(der: &[u8]) -> Option<&[u8]> {
    fn read_header(data: &[u8]) -> Option<(usize, usize)> {
        if data.len() < 2 {
            return None;
        }
        let mut idx = 1;
        let len_byte = data[idx];
        idx += 1;
        let len = if len_byte & 0x80 == 0 {
            len_byte as usize
        } else {
            let num_bytes = (len_byte & 0x7F) as usize;
            if num_bytes > 4 || data.len() < idx + num_bytes {
                return None;
            }
            let mut l = 0usize;
            for i in 0..num_bytes {
                l = (l << 8) | (data[idx + i] as usize);
            }
            idx += num_bytes;
            l
        };
        Some((idx, len))
    }

    if der.is_empty() || der[0] != 0x30 {
        return None;
    }
    let (outer_hdr_len, _) = read_header(der)?;
    let content = &der[outer_hdr_len..];
    if content.is_empty() {
        return None;
    }
    let (tbs_hdr_len, tbs_content_len) = read_header(content)?;
    let tbs_total_len = tbs_hdr_len + tbs_content_len;
    if content.len() < tbs_total_len {
        return None;
    }
    Some(&content[0..tbs_total_len])
}
