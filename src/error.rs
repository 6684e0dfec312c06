//! Closed error taxonomy. Every public, fallible operation returns one of
//! these concrete enums so callers can dispatch by kind instead of by
//! runtime type (see DESIGN.md "dynamic dispatch on error types").

use thiserror::Error;

/// Infrastructure failures shared across every other error group.
#[derive(Error, Debug)]
pub enum InfraError {
    #[error("operation timed out")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock contended")]
    LockContended,
}

#[derive(Error, Debug)]
pub enum CaError {
    #[error("certificate authority not initialized")]
    NotInitialized,
    #[error("certificate authority already initialized")]
    AlreadyInitialized,
    #[error("key generation failed: {0}")]
    KeyGenFailed(String),
    #[error("certificate registry is corrupt: {0}")]
    RegistryCorrupt(String),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

#[derive(Error, Debug)]
pub enum IssueError {
    #[error("subject {0:?} already holds an active certificate")]
    AlreadyIssued(String),
    #[error("cryptographic operation failed: {0}")]
    CryptoFailed(String),
    #[error("failed to persist the issued certificate record: {0}")]
    RegistryWriteFailed(String),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertError {
    #[error("certificate could not be decoded")]
    BadEncoding,
    #[error("certificate issuer is not this CA")]
    UntrustedIssuer,
    #[error("certificate signature is invalid")]
    InvalidSignature,
    #[error("certificate has expired")]
    Expired,
    #[error("certificate is not yet valid")]
    NotYetValid,
    #[error("certificate has been revoked")]
    Revoked,
    #[error("certificate is missing a required extension")]
    InvalidExtension,
    #[error("certificate key usage does not permit this operation")]
    InvalidKeyUsage,
    #[error("certificate extended key usage does not permit this operation")]
    InvalidExtendedKeyUsage,
    #[error("certificate subject kind does not match what was expected")]
    KindMismatch,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("previous_nonce was already used; possible QR replay")]
    ReplayedQr,
    #[error("no such challenge is pending")]
    UnknownChallenge,
    #[error("challenge has already been consumed")]
    AlreadyConsumed,
    #[error("challenge has expired")]
    ChallengeExpired,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerifyFailed,
    #[error("signature is malformed")]
    MalformedSignature,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("student is not authorized for this room")]
    NotAuthorizedForRoom,
    #[error("student is outside the permitted access window")]
    OutsideAccessWindow,
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("an attendance record already exists for this student/room/timestamp")]
    DuplicateRecord,
    #[error("failed to persist the attendance record: {0}")]
    PersistFailed(String),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("bad encoding: {0}")]
    BadEncoding(String),
    #[error("wrong key type")]
    WrongKeyType,
    #[error("signature verification failed")]
    VerifyFailed,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("duplicate serial number")]
    DuplicateSerial,
    #[error("no record for that serial/subject")]
    Unknown,
    #[error("certificate record is already revoked")]
    AlreadyRevoked,
    #[error(transparent)]
    Infra(#[from] InfraError),
}

#[derive(Error, Debug)]
pub enum CrlError {
    #[error("unknown revocation reason code")]
    UnknownReason,
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Ca(#[from] CaError),
}

/// Top-level error, wrapping every component's closed error group.
///
/// This is the type `Core`'s high-level entry points return; lower-level
/// component methods return their own narrower enum so unit tests can
/// match on exactly the failure mode the spec names for that component.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ca(#[from] CaError),
    #[error(transparent)]
    Issue(#[from] IssueError),
    #[error(transparent)]
    Cert(#[from] CertError),
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Crl(#[from] CrlError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
