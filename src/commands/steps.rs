use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hostprep::actions::{pkg, service, user};
use hostprep::error::ProvisionError;
use hostprep::facts::PackageManager;
use hostprep::fs_util;
use hostprep::runner::{self, RunReport, Step};

use crate::cli::output;

/// Runs a flow's step list. On failure the completed outcomes are printed
/// before the error propagates, so the operator sees how far the run got.
pub(crate) async fn run_flow(steps: &[Box<dyn Step>]) -> anyhow::Result<RunReport> {
    match runner::run_steps(steps).await {
        Ok(report) => Ok(report),
        Err(failure) => {
            output::print_completed(&failure.completed);
            Err(ProvisionError::from(failure).into())
        }
    }
}

pub(crate) fn owned_by(path: &Path, uid: u32) -> Result<bool, ProvisionError> {
    use std::os::unix::fs::MetadataExt;
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(metadata.uid() == uid),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ProvisionError::io(
            format!("failed to stat {}", path.display()),
            e,
        )),
    }
}

/// Directory with a fixed mode, optionally owned by a named user. The owner
/// is resolved by name at execution time because the user may be created by
/// an earlier step of the same run.
pub(crate) struct EnsureDirStep {
    pub(crate) name: &'static str,
    pub(crate) path: PathBuf,
    pub(crate) mode: u32,
    pub(crate) owner: Option<String>,
}

impl EnsureDirStep {
    async fn satisfied(&self) -> Result<bool, ProvisionError> {
        if !fs_util::has_mode(&self.path, self.mode).await? {
            return Ok(false);
        }
        match &self.owner {
            Some(owner) => {
                let identity = user::lookup_user(owner).await?;
                owned_by(&self.path, identity.uid)
            }
            None => Ok(true),
        }
    }
}

#[async_trait]
impl Step for EnsureDirStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        self.satisfied().await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        fs_util::ensure_dir(&self.path, self.mode).await?;
        if let Some(owner) = &self.owner {
            let identity = user::lookup_user(owner).await?;
            fs_util::ensure_owner(&self.path, identity.uid, identity.gid)?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        self.satisfied().await
    }
}

/// A set of packages that must be installed. The precondition queries the
/// package database so a re-run reports "already satisfied"; the action
/// trusts the package manager's own idempotency.
pub(crate) struct EnsurePackagesStep {
    pub(crate) name: &'static str,
    pub(crate) manager: PackageManager,
    pub(crate) packages: Vec<String>,
    pub(crate) timeout: Duration,
}

impl EnsurePackagesStep {
    fn package_refs(&self) -> Vec<&str> {
        self.packages.iter().map(String::as_str).collect()
    }
}

#[async_trait]
impl Step for EnsurePackagesStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        pkg::packages_installed(self.manager, &self.package_refs()).await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        pkg::ensure_packages(self.manager, &self.package_refs(), self.timeout).await
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        pkg::packages_installed(self.manager, &self.package_refs()).await
    }
}

/// A service unit that must be enabled and active.
pub(crate) struct EnsureServiceStep {
    pub(crate) name: &'static str,
    pub(crate) unit: String,
    pub(crate) poll_attempts: u64,
    pub(crate) poll_interval: Duration,
}

#[async_trait]
impl Step for EnsureServiceStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        Ok(service::is_enabled(&self.unit).await? && service::is_active(&self.unit).await?)
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        service::ensure_enabled_and_running(&self.unit, self.poll_attempts, self.poll_interval)
            .await
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        service::is_active(&self.unit).await
    }
}
