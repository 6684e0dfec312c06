//! Certificate profiles: turns a subject kind + identifiers into the
//! `rcgen::CertificateParams` that carry the exact extension set §3/§4.C
//! require. Grounded on `crab-cert::profile::{create_ca_params,
//! create_cert_params}`, generalized from the teacher's tenant/device custom
//! extensions to the fixed SecureAttend extension contract.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyUsagePurpose, SanType,
};
use serde::{Deserialize, Serialize};
use time::Duration;

/// The kinds of subject a certificate may identify, per §3's
/// `CertificateRecord.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectKind {
    Ca,
    Student,
    Door,
    Server,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Ca => "CA",
            SubjectKind::Student => "Student",
            SubjectKind::Door => "Door",
            SubjectKind::Server => "Server",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaProfile {
    pub common_name: String,
    pub organization: String,
    pub validity_days: u32,
}

impl CaProfile {
    pub fn root(common_name: impl Into<String>, validity_days: u32) -> Self {
        Self {
            common_name: common_name.into(),
            organization: "SecureAttend".to_string(),
            validity_days,
        }
    }
}

/// Parameters for issuing one end-entity certificate.
#[derive(Debug, Clone)]
pub struct CertProfile {
    pub kind: SubjectKind,
    pub subject_id: String,
    pub common_name: String,
    pub organization: String,
    pub email: Option<String>,
    pub room_id: Option<String>,
    pub validity_days: u32,
}

impl CertProfile {
    pub fn student(student_id: &str, email: Option<String>, validity_days: u32) -> Self {
        Self {
            kind: SubjectKind::Student,
            subject_id: student_id.to_string(),
            common_name: student_id.to_string(),
            organization: "SecureAttend Students".to_string(),
            email,
            room_id: None,
            validity_days,
        }
    }

    pub fn door(door_id: &str, room_id: &str, validity_days: u32) -> Self {
        Self {
            kind: SubjectKind::Door,
            subject_id: door_id.to_string(),
            common_name: door_id.to_string(),
            organization: "SecureAttend Doors".to_string(),
            email: None,
            room_id: Some(room_id.to_string()),
            validity_days,
        }
    }

    pub fn server(server_id: &str, validity_days: u32) -> Self {
        Self {
            kind: SubjectKind::Server,
            subject_id: server_id.to_string(),
            common_name: server_id.to_string(),
            organization: "SecureAttend Servers".to_string(),
            email: None,
            room_id: None,
            validity_days,
        }
    }

    /// The DNS-shaped SAN entry binding this door's `room_id`, per §3:
    /// "door certificates carry a SubjectAlternativeName entry binding room_id".
    pub fn room_san(room_id: &str) -> String {
        format!("room-{room_id}.door.secureattend.internal")
    }
}

pub(crate) fn create_ca_params(profile: &CaProfile, now: chrono::DateTime<chrono::Utc>) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::new()).expect("empty SAN list is always valid");
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, &profile.common_name);
    dn.push(DnType::OrganizationName, &profile.organization);
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let now = crate::crl::to_time(now);
    params.not_before = now;
    params.not_after = now + Duration::days(profile.validity_days as i64);

    params
}

/// Build the `CertificateParams` for one end-entity certificate. Fails
/// rather than panics on a malformed `email` (§4.A: "constant-failure-mode
/// on bad input, no partial state") so a bad caller-supplied string is
/// classified and returned, never a crash.
pub(crate) fn create_cert_params(
    profile: &CertProfile,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<CertificateParams, String> {
    let mut sans = Vec::new();
    if let Some(room_id) = &profile.room_id {
        sans.push(CertProfile::room_san(room_id));
    }

    let mut params = CertificateParams::new(sans).expect("SAN strings are well-formed");
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, &profile.common_name);
    dn.push(DnType::OrganizationName, &profile.organization);
    if let Some(email) = &profile.email {
        // rcgen models an email in the DN as a custom attribute; we also add
        // it as a rfc822Name SAN so client software can rely on the SAN form.
        let ia5 = email
            .clone()
            .try_into()
            .map_err(|_| format!("email address is not a valid IA5 string: {email}"))?;
        params.subject_alt_names.push(SanType::Rfc822Name(ia5));
    }
    params.distinguished_name = dn;

    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

    params.extended_key_usages = match profile.kind {
        SubjectKind::Student => vec![ExtendedKeyUsagePurpose::ClientAuth],
        SubjectKind::Door => vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ],
        SubjectKind::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
        SubjectKind::Ca => vec![],
    };

    let now = crate::crl::to_time(now);
    params.not_before = now;
    params.not_after = now + Duration::days(profile.validity_days as i64);

    Ok(params)
}
