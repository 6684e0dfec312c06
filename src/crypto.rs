//! Crypto primitives adapter (§4.A). Grounded on `crab-cert::crypto`, fixed
//! down from the teacher's ECDSA-or-RSA dispatch to the RSA-2048 + PKCS#1
//! v1.5 + SHA-256 discipline SecureAttend's spec requires throughout.

use crate::error::CryptoError;
use rand::{RngCore, rngs::OsRng};
use ring::signature;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use x509_parser::pem::parse_x509_pem;

pub type Result<T> = std::result::Result<T, CryptoError>;

/// A freshly generated RSA keypair, PEM-encoded (PKCS#8 private key).
pub struct RsaKeyMaterial {
    pub private_key_pem: String,
}

/// Generate a new RSA private key of the given bit length.
pub fn generate_rsa(bits: u32) -> Result<RsaKeyMaterial> {
    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, bits as usize)
        .map_err(|e| CryptoError::BadEncoding(format!("RSA keygen failed: {e}")))?;
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::BadEncoding(format!("PKCS8 encode failed: {e}")))?;
    Ok(RsaKeyMaterial {
        private_key_pem: pem.to_string(),
    })
}

/// SHA-256 of arbitrary bytes.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// A random serial number, at least 64 bits, never zero.
pub fn serial_random() -> u64 {
    loop {
        let mut buf = [0u8; 8];
        OsRng.fill_bytes(&mut buf);
        let v = u64::from_be_bytes(buf);
        if v != 0 {
            return v;
        }
    }
}

/// Sign `msg` with the PKCS#8 RSA private key in `priv_key_pem`, returning
/// the PKCS#1 v1.5 + SHA-256 signature hex-encoded.
pub fn sign(priv_key_pem: &str, msg: &[u8]) -> Result<String> {
    let der = pem_to_der(priv_key_pem, "PRIVATE KEY")?;
    let rng = ring::rand::SystemRandom::new();
    let key_pair = signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|_| CryptoError::WrongKeyType)?;
    let mut sig = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(&signature::RSA_PKCS1_SHA256, &rng, msg, &mut sig)
        .map_err(|_| CryptoError::BadEncoding("RSA signing failed".into()))?;
    Ok(hex::encode(sig))
}

/// Verify `sig_hex` over `msg` against the RSA public key embedded in
/// `cert_pem` (an X.509 PEM certificate).
pub fn verify(cert_pem: &str, msg: &[u8], sig_hex: &str) -> Result<bool> {
    let sig = hex::decode(sig_hex).map_err(|_| CryptoError::BadEncoding("signature is not hex".into()))?;
    let (_, pem) =
        parse_x509_pem(cert_pem.as_bytes()).map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
    let (_, x509) = x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;

    let spki = x509.tbs_certificate.subject_pki;
    let key_bytes = spki.subject_public_key.data;

    let public_key = signature::UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, key_bytes);
    Ok(public_key.verify(msg, &sig).is_ok())
}

/// Verify `sig_hex` over `msg` against a raw RSA public key (SPKI DER),
/// used when the verifying party is not a certificate but a bare signing
/// key (e.g. a dedicated attendance-record backend key, §9).
pub fn verify_with_spki_der(spki_der: &[u8], msg: &[u8], sig_hex: &str) -> Result<bool> {
    let sig = hex::decode(sig_hex).map_err(|_| CryptoError::BadEncoding("signature is not hex".into()))?;
    let public_key = signature::UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, spki_der);
    Ok(public_key.verify(msg, &sig).is_ok())
}

fn pem_to_der(pem_str: &str, expected_tag: &str) -> Result<Vec<u8>> {
    let pems =
        ::pem::parse_many(pem_str).map_err(|e| CryptoError::BadEncoding(format!("PEM parse error: {e}")))?;
    for p in pems {
        if p.tag() == expected_tag {
            return Ok(p.into_contents());
        }
    }
    Err(CryptoError::BadEncoding(format!("no {expected_tag} found in PEM")))
}
