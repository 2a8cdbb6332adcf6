use std::env;
use std::path::PathBuf;

use tokio::fs;
use tracing::info;

use crate::error::ProvisionError;
use crate::exec::Cmd;

const OS_RELEASE_PATH: &str = "/etc/os-release";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
}

impl PackageManager {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
        }
    }
}

/// Read-only facts discovered about the target host. Collected once per run
/// and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub os_id: String,
    pub package_manager: PackageManager,
    pub has_systemctl: bool,
    pub postgres_major: Option<u32>,
}

impl HostFacts {
    /// The SSH service unit name for this OS family.
    #[must_use]
    pub fn ssh_service(&self) -> &'static str {
        match self.package_manager {
            PackageManager::Apt => "ssh",
            PackageManager::Dnf => "sshd",
        }
    }

    /// The group that grants privilege escalation on this OS family.
    #[must_use]
    pub fn admin_group(&self) -> &'static str {
        match self.package_manager {
            PackageManager::Apt => "sudo",
            PackageManager::Dnf => "wheel",
        }
    }

    /// Where the client authentication rules live.
    ///
    /// # Errors
    /// Returns `Validation` when the installed `PostgreSQL` version is needed
    /// but was not detected.
    pub fn pg_hba_path(&self) -> Result<PathBuf, ProvisionError> {
        pg_hba_path(self.package_manager, self.postgres_major)
    }
}

/// Where the client authentication rules live for this OS family.
///
/// # Errors
/// Returns `Validation` when the installed `PostgreSQL` version is needed
/// but was not detected.
pub fn pg_hba_path(
    manager: PackageManager,
    postgres_major: Option<u32>,
) -> Result<PathBuf, ProvisionError> {
    match manager {
        PackageManager::Apt => {
            let major = postgres_major.ok_or_else(|| {
                ProvisionError::validation(
                    "installed PostgreSQL version not detected; is postgresql installed?",
                )
            })?;
            Ok(PathBuf::from(format!(
                "/etc/postgresql/{major}/main/pg_hba.conf"
            )))
        }
        PackageManager::Dnf => Ok(PathBuf::from("/var/lib/pgsql/data/pg_hba.conf")),
    }
}

/// Probes the installed `PostgreSQL` major version. `None` when `psql` is
/// absent or unparseable. Safe to call again after a package install step
/// changed the answer.
pub async fn detect_postgres_major() -> Result<Option<u32>, ProvisionError> {
    if which::which("psql").is_err() {
        return Ok(None);
    }
    let output = Cmd::new("psql").arg("--version").output().await?;
    if output.success {
        Ok(parse_postgres_major(&output.stdout))
    } else {
        Ok(None)
    }
}

/// Discovers host facts.
///
/// # Errors
/// Returns `Validation` when no supported package manager is present.
pub async fn discover() -> Result<HostFacts, ProvisionError> {
    let os_id = match fs::read_to_string(OS_RELEASE_PATH).await {
        Ok(contents) => parse_os_release_id(&contents),
        Err(_) => "linux".to_string(),
    };

    let package_manager = if which::which("apt-get").is_ok() {
        PackageManager::Apt
    } else if which::which("dnf").is_ok() {
        PackageManager::Dnf
    } else {
        return Err(ProvisionError::validation(
            "no supported package manager found (need apt-get or dnf)",
        ));
    };

    let has_systemctl = which::which("systemctl").is_ok();
    let postgres_major = detect_postgres_major().await?;

    let facts = HostFacts {
        os_id,
        package_manager,
        has_systemctl,
        postgres_major,
    };
    info!(
        "host: os={}, package manager={}, systemctl={}, postgres major={:?}",
        facts.os_id,
        facts.package_manager.as_str(),
        facts.has_systemctl,
        facts.postgres_major
    );
    Ok(facts)
}

/// The non-root user this invocation acts on behalf of. Under sudo that is
/// `SUDO_USER`; otherwise `USER`, which must not be root.
///
/// # Errors
/// Returns `Validation` when no non-root invoking user can be determined.
pub fn invoking_user() -> Result<String, ProvisionError> {
    if let Ok(name) = env::var("SUDO_USER") {
        if !name.is_empty() && name != "root" {
            return Ok(name);
        }
    }
    match env::var("USER") {
        Ok(name) if !name.is_empty() && name != "root" => Ok(name),
        _ => Err(ProvisionError::validation(
            "cannot determine the invoking non-root user; set credentials.owner explicitly",
        )),
    }
}

fn parse_os_release_id(contents: &str) -> String {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("ID="))
        .map(|value| value.trim().trim_matches('"').to_string())
        .unwrap_or_else(|| "linux".to_string())
}

fn parse_postgres_major(version_output: &str) -> Option<u32> {
    // e.g. `psql (PostgreSQL) 16.4 (Ubuntu 16.4-0ubuntu0.24.04.2)`
    let version = version_output.split_whitespace().nth(2)?;
    version.split('.').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_release_id() {
        let contents = "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"24.04\"\n";
        assert_eq!(parse_os_release_id(contents), "ubuntu");
    }

    #[test]
    fn test_parse_os_release_id_quoted() {
        assert_eq!(parse_os_release_id("ID=\"rocky\"\n"), "rocky");
    }

    #[test]
    fn test_parse_os_release_id_missing_defaults() {
        assert_eq!(parse_os_release_id("NAME=Something\n"), "linux");
    }

    #[test]
    fn test_parse_postgres_major() {
        assert_eq!(
            parse_postgres_major("psql (PostgreSQL) 16.4 (Ubuntu 16.4-0ubuntu0.24.04.2)\n"),
            Some(16)
        );
        assert_eq!(parse_postgres_major("psql (PostgreSQL) 14.11\n"), Some(14));
        assert_eq!(parse_postgres_major("garbage"), None);
    }

    #[test]
    fn test_ssh_service_and_admin_group_per_family() {
        let apt = HostFacts {
            os_id: "ubuntu".into(),
            package_manager: PackageManager::Apt,
            has_systemctl: true,
            postgres_major: Some(16),
        };
        assert_eq!(apt.ssh_service(), "ssh");
        assert_eq!(apt.admin_group(), "sudo");

        let dnf = HostFacts {
            package_manager: PackageManager::Dnf,
            ..apt
        };
        assert_eq!(dnf.ssh_service(), "sshd");
        assert_eq!(dnf.admin_group(), "wheel");
    }

    #[test]
    fn test_pg_hba_path_requires_version_on_apt() {
        let facts = HostFacts {
            os_id: "ubuntu".into(),
            package_manager: PackageManager::Apt,
            has_systemctl: true,
            postgres_major: None,
        };
        assert!(facts.pg_hba_path().is_err());

        let facts = HostFacts {
            postgres_major: Some(16),
            ..facts
        };
        assert_eq!(
            facts.pg_hba_path().unwrap(),
            PathBuf::from("/etc/postgresql/16/main/pg_hba.conf")
        );
    }
}
