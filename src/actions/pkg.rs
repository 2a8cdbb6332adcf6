use std::time::Duration;

use tracing::info;

use crate::error::ProvisionError;
use crate::exec::Cmd;
use crate::facts::PackageManager;

#[must_use]
pub fn install_args(packages: &[&str]) -> Vec<String> {
    let mut args = vec!["install".to_string(), "-y".to_string()];
    args.extend(packages.iter().map(ToString::to_string));
    args
}

#[must_use]
pub fn query_command(manager: PackageManager, package: &str) -> (&'static str, Vec<String>) {
    match manager {
        PackageManager::Apt => (
            "dpkg-query",
            vec![
                "-W".to_string(),
                "-f".to_string(),
                "${Status}".to_string(),
                package.to_string(),
            ],
        ),
        PackageManager::Dnf => ("rpm", vec!["-q".to_string(), package.to_string()]),
    }
}

/// Reports whether a package is installed.
///
/// # Errors
/// Returns an error when the query tool itself cannot run.
pub async fn package_installed(
    manager: PackageManager,
    package: &str,
) -> Result<bool, ProvisionError> {
    let (program, args) = query_command(manager, package);
    let output = Cmd::new(program).args(args).output().await?;
    match manager {
        PackageManager::Apt => Ok(output.success && output.stdout.contains("install ok installed")),
        PackageManager::Dnf => Ok(output.success),
    }
}

/// Reports whether every named package is installed.
///
/// # Errors
/// Propagates query failures.
pub async fn packages_installed(
    manager: PackageManager,
    packages: &[&str],
) -> Result<bool, ProvisionError> {
    for package in packages {
        if !package_installed(manager, package).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Installs any missing packages in one package-manager invocation.
/// "Already installed" is success; the package manager's own idempotency is
/// trusted.
///
/// # Errors
/// Returns `ActionFailed` when the install command fails.
pub async fn ensure_packages(
    manager: PackageManager,
    packages: &[&str],
    timeout: Duration,
) -> Result<(), ProvisionError> {
    if packages.is_empty() {
        return Ok(());
    }
    let mut cmd = Cmd::new(manager.as_str())
        .args(install_args(packages))
        .timeout(timeout);
    if manager == PackageManager::Apt {
        cmd = cmd.env("DEBIAN_FRONTEND", "noninteractive");
    }
    cmd.run().await?;
    info!("ensured packages: {}", packages.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_args() {
        assert_eq!(
            install_args(&["openssh-server", "postgresql"]),
            vec!["install", "-y", "openssh-server", "postgresql"]
        );
    }

    #[test]
    fn test_query_command_apt() {
        let (program, args) = query_command(PackageManager::Apt, "postgresql");
        assert_eq!(program, "dpkg-query");
        assert_eq!(args, vec!["-W", "-f", "${Status}", "postgresql"]);
    }

    #[test]
    fn test_query_command_dnf() {
        let (program, args) = query_command(PackageManager::Dnf, "postgresql-server");
        assert_eq!(program, "rpm");
        assert_eq!(args, vec!["-q", "postgresql-server"]);
    }
}
