use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use hostprep::Settings;
use hostprep::actions::{sudoers, user};
use hostprep::error::ProvisionError;
use hostprep::facts;
use hostprep::fetch;
use hostprep::fs_util;
use hostprep::runner::Step;

use crate::cli::args::UserArgs;
use crate::cli::output::{self, OutputOptions};
use crate::commands::steps::{owned_by, run_flow};

const SSH_DIR_MODE: u32 = 0o700;
const AUTHORIZED_KEYS_MODE: u32 = 0o600;

pub(crate) struct UserSummary {
    pub(crate) name: String,
    pub(crate) home: PathBuf,
    pub(crate) dropin_path: PathBuf,
    pub(crate) authorized_keys: Option<PathBuf>,
}

pub(crate) async fn run(
    _args: &UserArgs,
    settings: &Settings,
    options: OutputOptions,
) -> anyhow::Result<()> {
    let facts = facts::discover().await?;
    let name = settings.user.name.clone();
    let dropin_path = sudoers::dropin_path(&name);

    let mut steps: Vec<Box<dyn Step>> = vec![
        Box::new(ManagementUserStep {
            user: name.clone(),
            shell: settings.user.shell.clone(),
        }),
        Box::new(SudoMembershipStep {
            user: name.clone(),
            group: facts.admin_group().to_string(),
        }),
        Box::new(SudoersDropinStep {
            user: name.clone(),
            path: dropin_path.clone(),
        }),
        Box::new(SshDirStep { user: name.clone() }),
    ];
    if let Some(url) = &settings.ssh.authorized_key_url {
        steps.push(Box::new(AuthorizedKeyStep {
            user: name.clone(),
            url: url.clone(),
            timeout: settings.fetch_timeout()?,
        }));
    }

    let report = run_flow(&steps).await?;

    let identity = user::lookup_user(&name).await?;
    let authorized_keys = settings
        .ssh
        .authorized_key_url
        .as_ref()
        .map(|_| authorized_keys_path(&identity.home));
    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_report(&report);
        output::print_user_summary(&UserSummary {
            name,
            home: identity.home,
            dropin_path,
            authorized_keys,
        });
    }
    Ok(())
}

fn ssh_dir_path(home: &std::path::Path) -> PathBuf {
    home.join(".ssh")
}

fn authorized_keys_path(home: &std::path::Path) -> PathBuf {
    ssh_dir_path(home).join("authorized_keys")
}

struct ManagementUserStep {
    user: String,
    shell: String,
}

#[async_trait]
impl Step for ManagementUserStep {
    fn name(&self) -> &'static str {
        "management-user"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        user::user_exists(&self.user).await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        user::ensure_user(&self.user, &self.shell).await?;
        Ok(())
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        user::user_exists(&self.user).await
    }
}

struct SudoMembershipStep {
    user: String,
    group: String,
}

#[async_trait]
impl Step for SudoMembershipStep {
    fn name(&self) -> &'static str {
        "sudo-membership"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        user::in_group(&self.user, &self.group).await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        user::ensure_group_membership(&self.user, &self.group).await
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        user::in_group(&self.user, &self.group).await
    }
}

struct SudoersDropinStep {
    user: String,
    path: PathBuf,
}

#[async_trait]
impl Step for SudoersDropinStep {
    fn name(&self) -> &'static str {
        "sudoers-dropin"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        sudoers::dropin_satisfied(&self.user, &self.path).await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        sudoers::ensure_dropin(&self.user, &self.path).await
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        sudoers::dropin_satisfied(&self.user, &self.path).await
    }
}

/// `~/.ssh` for the management user. The home directory is looked up at
/// execution time; the user is created earlier in the same run.
struct SshDirStep {
    user: String,
}

impl SshDirStep {
    async fn satisfied(&self) -> Result<bool, ProvisionError> {
        let identity = user::lookup_user(&self.user).await?;
        let path = ssh_dir_path(&identity.home);
        Ok(fs_util::has_mode(&path, SSH_DIR_MODE).await? && owned_by(&path, identity.uid)?)
    }
}

#[async_trait]
impl Step for SshDirStep {
    fn name(&self) -> &'static str {
        "ssh-dir"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        if !user::user_exists(&self.user).await? {
            return Ok(false);
        }
        self.satisfied().await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        let identity = user::lookup_user(&self.user).await?;
        let path = ssh_dir_path(&identity.home);
        fs_util::ensure_dir(&path, SSH_DIR_MODE).await?;
        fs_util::ensure_owner(&path, identity.uid, identity.gid)
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        self.satisfied().await
    }
}

/// Installs a downloaded public key as the management user's
/// authorized_keys. Append-if-absent semantics keep re-runs from duplicating
/// key lines; the first install is an atomic whole-file write.
struct AuthorizedKeyStep {
    user: String,
    url: String,
    timeout: Duration,
}

impl AuthorizedKeyStep {
    async fn satisfied(&self) -> Result<bool, ProvisionError> {
        let identity = user::lookup_user(&self.user).await?;
        let path = authorized_keys_path(&identity.home);
        if !fs_util::has_mode(&path, AUTHORIZED_KEYS_MODE).await? {
            return Ok(false);
        }
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ProvisionError::io(format!("failed to read {}", path.display()), e))?;
        Ok(!contents.trim().is_empty() && owned_by(&path, identity.uid)?)
    }
}

#[async_trait]
impl Step for AuthorizedKeyStep {
    fn name(&self) -> &'static str {
        "authorized-key"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        if !user::user_exists(&self.user).await? {
            return Ok(false);
        }
        self.satisfied().await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        let identity = user::lookup_user(&self.user).await?;
        let path = authorized_keys_path(&identity.home);
        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if exists {
            let key = fetch::download_key(&self.url, self.timeout).await?;
            for line in key.expose().lines().filter(|line| !line.trim().is_empty()) {
                fs_util::append_line_if_absent(&path, line).await?;
            }
            fs_util::ensure_mode(&path, AUTHORIZED_KEYS_MODE).await?;
        } else {
            fetch::fetch_remote_key(&self.url, &path, self.timeout).await?;
        }
        fs_util::ensure_owner(&path, identity.uid, identity.gid)
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        self.satisfied().await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_authorized_keys_path() {
        assert_eq!(
            authorized_keys_path(Path::new("/home/semaphore")),
            PathBuf::from("/home/semaphore/.ssh/authorized_keys")
        );
    }
}
