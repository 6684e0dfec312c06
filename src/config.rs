//! Configuration surface, following `crab-auth::config::Config::from_env`'s
//! style: plain struct, env-var loading with defaults, no builder macro.

use crate::error::ConfigError;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub ca_dir: PathBuf,
    pub certs_dir: PathBuf,
    pub db_path: PathBuf,
    pub ca_validity_days: u32,
    pub student_validity_days: u32,
    pub door_validity_days: u32,
    pub server_validity_days: u32,
    pub rsa_bits: u32,
    pub challenge_ttl: Duration,
    pub nonce_window: Duration,
    pub crl_validity_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ca_dir: PathBuf::from("./data/ca"),
            certs_dir: PathBuf::from("./data/certs"),
            db_path: PathBuf::from("./data/secureattend.sqlite3"),
            ca_validity_days: 3650,
            student_validity_days: 365,
            door_validity_days: 1825,
            server_validity_days: 1825,
            rsa_bits: 2048,
            challenge_ttl: Duration::from_secs(30),
            nonce_window: Duration::from_secs(300),
            crl_validity_days: 7,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// [`Config::default`] for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SECUREATTEND_CA_DIR") {
            cfg.ca_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SECUREATTEND_CERTS_DIR") {
            cfg.certs_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SECUREATTEND_DB_PATH") {
            cfg.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SECUREATTEND_CA_VALIDITY_DAYS") {
            cfg.ca_validity_days = parse_u32("ca_validity_days", &v)?;
        }
        if let Ok(v) = std::env::var("SECUREATTEND_STUDENT_VALIDITY_DAYS") {
            cfg.student_validity_days = parse_u32("student_validity_days", &v)?;
        }
        if let Ok(v) = std::env::var("SECUREATTEND_DOOR_VALIDITY_DAYS") {
            cfg.door_validity_days = parse_u32("door_validity_days", &v)?;
        }
        if let Ok(v) = std::env::var("SECUREATTEND_SERVER_VALIDITY_DAYS") {
            cfg.server_validity_days = parse_u32("server_validity_days", &v)?;
        }
        if let Ok(v) = std::env::var("SECUREATTEND_RSA_BITS") {
            cfg.rsa_bits = parse_u32("rsa_bits", &v)?;
        }
        if let Ok(v) = std::env::var("SECUREATTEND_CHALLENGE_TTL_SECONDS") {
            cfg.challenge_ttl = Duration::from_secs(parse_u32("challenge_ttl_seconds", &v)? as u64);
        }
        if let Ok(v) = std::env::var("SECUREATTEND_NONCE_WINDOW_SECONDS") {
            cfg.nonce_window = Duration::from_secs(parse_u32("nonce_window_seconds", &v)? as u64);
        }
        if let Ok(v) = std::env::var("SECUREATTEND_CRL_VALIDITY_DAYS") {
            cfg.crl_validity_days = parse_u32("crl_validity_days", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.rsa_bits, 2048 | 3072 | 4096) {
            return Err(ConfigError::Invalid {
                field: "rsa_bits",
                reason: format!("{} is not one of 2048, 3072, 4096", self.rsa_bits),
            });
        }
        if self.ca_validity_days == 0 {
            return Err(ConfigError::Invalid {
                field: "ca_validity_days",
                reason: "must be positive".into(),
            });
        }
        if self.crl_validity_days == 0 {
            return Err(ConfigError::Invalid {
                field: "crl_validity_days",
                reason: "must be positive".into(),
            });
        }
        if self.student_validity_days == 0 {
            return Err(ConfigError::Invalid {
                field: "student_validity_days",
                reason: "must be positive".into(),
            });
        }
        if self.door_validity_days == 0 {
            return Err(ConfigError::Invalid {
                field: "door_validity_days",
                reason: "must be positive".into(),
            });
        }
        if self.server_validity_days == 0 {
            return Err(ConfigError::Invalid {
                field: "server_validity_days",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn ca_private_key_path(&self) -> PathBuf {
        self.ca_dir.join("ca_private_key.pem")
    }

    pub fn ca_certificate_path(&self) -> PathBuf {
        self.ca_dir.join("ca_certificate.pem")
    }

    pub fn cert_registry_path(&self) -> PathBuf {
        self.ca_dir.join("cert_registry.json")
    }

    pub fn crl_path(&self) -> PathBuf {
        self.ca_dir.join("crl.pem")
    }

    pub fn student_dir(&self, student_id: &str) -> PathBuf {
        self.certs_dir.join("students").join(student_id)
    }

    pub fn door_dir(&self, door_id: &str) -> PathBuf {
        self.certs_dir.join("doors").join(door_id)
    }
}

fn parse_u32(field: &'static str, raw: &str) -> Result<u32, ConfigError> {
    raw.parse::<u32>().map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

/// Used by callers constructing a [`Config`] against a fresh temp directory
/// (tests, first-run bootstrap) to make sure the directories it names exist.
pub fn ensure_dirs(cfg: &Config) -> std::io::Result<()> {
    std::fs::create_dir_all(&cfg.ca_dir)?;
    std::fs::create_dir_all(&cfg.certs_dir)?;
    if let Some(parent) = Path::new(&cfg.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_student_validity_days_is_rejected() {
        let cfg = Config {
            student_validity_days: 0,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "student_validity_days", .. })
        ));
    }

    #[test]
    fn zero_door_validity_days_is_rejected() {
        let cfg = Config {
            door_validity_days: 0,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "door_validity_days", .. })
        ));
    }

    #[test]
    fn zero_server_validity_days_is_rejected() {
        let cfg = Config {
            server_validity_days: 0,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "server_validity_days", .. })
        ));
    }
}
