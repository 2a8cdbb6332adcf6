use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::db;
use crate::error::ProvisionError;
use crate::fetch;
use crate::keys::SUPPORTED_ALGORITHMS;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub user: UserSettings,
    pub ssh: SshSettings,
    pub db: DbSettings,
    pub maas: MaasSettings,
    pub credentials: CredentialsSettings,
    pub fetch: FetchSettings,
    pub service: ServiceSettings,
    pub command_timeout: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserSettings {
    pub name: String,
    pub shell: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SshSettings {
    pub key_path: PathBuf,
    pub algorithm: String,
    pub bits: Option<u32>,
    pub comment: String,
    pub authorized_key_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbSettings {
    pub name: String,
    pub user: String,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaasSettings {
    pub channel: String,
    pub url: String,
    pub admin_username: String,
    pub admin_email: String,
    pub admin_password: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsSettings {
    /// Directory under the owner's home that holds the record.
    pub app_dir: String,
    pub file_name: String,
    /// Overrides the invoking-user discovery (`SUDO_USER`/`USER`).
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchSettings {
    pub timeout: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceSettings {
    pub poll_attempts: u64,
    pub poll_interval_secs: u64,
}

const DEFAULT_USER_NAME: &str = "semaphore";
const DEFAULT_USER_SHELL: &str = "/bin/bash";
const DEFAULT_KEY_PATH: &str = "~/.ssh/id_ed25519";
const DEFAULT_KEY_ALGORITHM: &str = "ed25519";
const DEFAULT_KEY_COMMENT: &str = "hostprep";
const DEFAULT_DB_NAME: &str = "maasdb";
const DEFAULT_DB_USER: &str = "maas";
const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_MAAS_CHANNEL: &str = "3.5/stable";
const DEFAULT_MAAS_URL: &str = "http://localhost:5240/MAAS";
const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_ADMIN_EMAIL: &str = "admin@example.com";
const DEFAULT_CREDS_APP_DIR: &str = "maas";
const DEFAULT_CREDS_FILE_NAME: &str = "maas.creds";
const DEFAULT_FETCH_TIMEOUT: &str = "30s";
const DEFAULT_POLL_ATTEMPTS: u64 = 15;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_COMMAND_TIMEOUT: &str = "10m";
const MIN_RSA_BITS: u32 = 2048;

impl Settings {
    /// Creates a new `Settings` instance.
    ///
    /// # Errors
    /// Returns error if configuration parsing fails (e.g. file not found,
    /// invalid format).
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = Config::builder();

        // 1. Set Defaults
        s = s
            .set_default("user.name", DEFAULT_USER_NAME)?
            .set_default("user.shell", DEFAULT_USER_SHELL)?
            .set_default("ssh.key_path", DEFAULT_KEY_PATH)?
            .set_default("ssh.algorithm", DEFAULT_KEY_ALGORITHM)?
            .set_default("ssh.comment", DEFAULT_KEY_COMMENT)?
            .set_default("db.name", DEFAULT_DB_NAME)?
            .set_default("db.user", DEFAULT_DB_USER)?
            .set_default("db.host", DEFAULT_DB_HOST)?
            .set_default("db.port", DEFAULT_DB_PORT)?
            .set_default("maas.channel", DEFAULT_MAAS_CHANNEL)?
            .set_default("maas.url", DEFAULT_MAAS_URL)?
            .set_default("maas.admin_username", DEFAULT_ADMIN_USERNAME)?
            .set_default("maas.admin_email", DEFAULT_ADMIN_EMAIL)?
            .set_default("credentials.app_dir", DEFAULT_CREDS_APP_DIR)?
            .set_default("credentials.file_name", DEFAULT_CREDS_FILE_NAME)?
            .set_default("fetch.timeout", DEFAULT_FETCH_TIMEOUT)?
            .set_default("service.poll_attempts", DEFAULT_POLL_ATTEMPTS)?
            .set_default("service.poll_interval_secs", DEFAULT_POLL_INTERVAL_SECS)?
            .set_default("command_timeout", DEFAULT_COMMAND_TIMEOUT)?;

        // 2. Merge File (optional)
        // If config_path is provided, use it. Otherwise look for "hostprep.toml"
        let path = config_path.unwrap_or_else(|| PathBuf::from("hostprep.toml"));

        // Add file source (required = false, so it doesn't panic if missing)
        s = s.add_source(File::from(path).required(false));

        // 3. Environment Variables
        // e.g. HOSTPREP_USER_NAME, HOSTPREP_DB_PASSWORD
        s = s.add_source(Environment::with_prefix("HOSTPREP").separator("_"));

        // 4. Build
        s.build()?.try_deserialize()
    }

    /// Validates configuration values for correctness.
    ///
    /// # Errors
    /// Returns `Validation` if any setting is invalid or out of range.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.user.name.is_empty() {
            return Err(ProvisionError::validation("user.name must not be empty"));
        }
        if !is_valid_unix_name(&self.user.name) {
            return Err(ProvisionError::validation(format!(
                "user.name `{}` is not a valid unix user name",
                self.user.name
            )));
        }
        if !self.user.shell.starts_with('/') {
            return Err(ProvisionError::validation(format!(
                "user.shell `{}` must be an absolute path",
                self.user.shell
            )));
        }
        if !SUPPORTED_ALGORITHMS.contains(&self.ssh.algorithm.as_str()) {
            return Err(ProvisionError::validation(format!(
                "ssh.algorithm `{}` is not one of {SUPPORTED_ALGORITHMS:?}",
                self.ssh.algorithm
            )));
        }
        if self.ssh.algorithm == "rsa" {
            let bits = self.ssh.bits.unwrap_or(0);
            if bits < MIN_RSA_BITS {
                return Err(ProvisionError::validation(format!(
                    "ssh.bits must be >= {MIN_RSA_BITS} for rsa keys"
                )));
            }
        }
        if let Some(url) = &self.ssh.authorized_key_url {
            fetch::validate_key_url(url)?;
        }
        db::validate_db_identifier(&self.db.name)?;
        db::validate_db_identifier(&self.db.user)?;
        if self.maas.admin_username.is_empty() {
            return Err(ProvisionError::validation(
                "maas.admin_username must not be empty",
            ));
        }
        if !self.maas.admin_email.contains('@') {
            return Err(ProvisionError::validation(format!(
                "maas.admin_email `{}` is not an email address",
                self.maas.admin_email
            )));
        }
        if self.service.poll_attempts == 0 {
            return Err(ProvisionError::validation(
                "service.poll_attempts must be greater than 0",
            ));
        }
        if self.service.poll_interval_secs == 0 {
            return Err(ProvisionError::validation(
                "service.poll_interval_secs must be greater than 0",
            ));
        }
        self.fetch_timeout()?;
        self.command_timeout()?;
        Ok(())
    }

    /// # Errors
    /// Returns `Validation` when `fetch.timeout` is not a duration string.
    pub fn fetch_timeout(&self) -> Result<Duration, ProvisionError> {
        parse_duration("fetch.timeout", &self.fetch.timeout)
    }

    /// # Errors
    /// Returns `Validation` when `command_timeout` is not a duration string.
    pub fn command_timeout(&self) -> Result<Duration, ProvisionError> {
        parse_duration("command_timeout", &self.command_timeout)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.service.poll_interval_secs)
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ProvisionError> {
    humantime::parse_duration(value).map_err(|e| {
        ProvisionError::validation(format!("{key} `{value}` is not a valid duration: {e}"))
    })
}

fn is_valid_unix_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_lowercase() || first == '_')
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-')
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_settings_defaults() {
        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.user.name, "semaphore");
        assert_eq!(settings.user.shell, "/bin/bash");
        assert_eq!(settings.ssh.algorithm, "ed25519");
        assert_eq!(settings.ssh.key_path, PathBuf::from("~/.ssh/id_ed25519"));
        assert!(settings.ssh.authorized_key_url.is_none());
        assert_eq!(settings.db.name, "maasdb");
        assert_eq!(settings.db.user, "maas");
        assert_eq!(settings.db.port, 5432);
        assert!(settings.db.password.is_none());
        assert_eq!(settings.maas.channel, "3.5/stable");
        assert_eq!(settings.maas.url, "http://localhost:5240/MAAS");
        assert_eq!(settings.service.poll_attempts, 15);
        assert_eq!(settings.service.poll_interval_secs, 2);
        assert_eq!(settings.fetch_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(
            settings.command_timeout().unwrap(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_load_settings_file_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [user]
            name = "operator"
            [db]
            name = "maas_prod"
            [maas]
            channel = "3.6/stable"
        "#
        )
        .unwrap();
        file.flush().unwrap();

        let settings = Settings::new(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(settings.user.name, "operator");
        assert_eq!(settings.db.name, "maas_prod");
        assert_eq!(settings.maas.channel, "3.6/stable");
        // untouched defaults survive
        assert_eq!(settings.db.user, "maas");
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let settings = Settings::new(None).unwrap();
        settings.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_algorithm() {
        let mut settings = Settings::new(None).unwrap();
        settings.ssh.algorithm = "dsa".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("ssh.algorithm"));
    }

    #[test]
    fn test_validate_rejects_weak_rsa() {
        let mut settings = Settings::new(None).unwrap();
        settings.ssh.algorithm = "rsa".to_string();
        settings.ssh.bits = Some(1024);
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("ssh.bits"));
    }

    #[test]
    fn test_validate_rejects_bad_db_identifier() {
        let mut settings = Settings::new(None).unwrap();
        settings.db.name = "maas;drop".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_key_url() {
        let mut settings = Settings::new(None).unwrap();
        settings.ssh.authorized_key_url = Some("ftp://keys.example.com".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_poll_attempts() {
        let mut settings = Settings::new(None).unwrap();
        settings.service.poll_attempts = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("poll_attempts"));
    }

    #[test]
    fn test_validate_rejects_bad_duration() {
        let mut settings = Settings::new(None).unwrap();
        settings.fetch.timeout = "soon".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_is_valid_unix_name() {
        assert!(is_valid_unix_name("semaphore"));
        assert!(is_valid_unix_name("deploy-bot"));
        assert!(is_valid_unix_name("_svc"));
        assert!(!is_valid_unix_name("Semaphore"));
        assert!(!is_valid_unix_name("1user"));
        assert!(!is_valid_unix_name(""));
    }
}
