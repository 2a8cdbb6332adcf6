use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hostprep::Settings;
use hostprep::error::ProvisionError;
use hostprep::fs_util;
use hostprep::keys::{
    self, KeypairSpec, PRIVATE_KEY_MODE, PUBLIC_KEY_MODE,
};
use hostprep::runner::Step;

use crate::cli::args::KeygenArgs;
use crate::cli::output::{self, OutputOptions};
use crate::commands::steps::{EnsureDirStep, run_flow};

pub(crate) struct KeygenSummary {
    pub(crate) algorithm: String,
    pub(crate) private_path: PathBuf,
    pub(crate) public_path: PathBuf,
}

pub(crate) async fn run(
    args: &KeygenArgs,
    settings: &Settings,
    options: OutputOptions,
) -> anyhow::Result<()> {
    let home = std::env::var("HOME").map(PathBuf::from).map_err(|_| {
        ProvisionError::validation("HOME is not set; cannot resolve the key path")
    })?;
    let private_path = expand_home(&settings.ssh.key_path, &home);
    let ssh_dir = private_path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            ProvisionError::validation(format!(
                "key path {} has no parent directory",
                private_path.display()
            ))
        })?;
    let spec = KeypairSpec {
        algorithm: settings.ssh.algorithm.clone(),
        bits: settings.ssh.bits,
        comment: settings.ssh.comment.clone(),
        private_path: private_path.clone(),
        force: args.force,
    };
    let public_path = spec.public_path();

    let steps: Vec<Box<dyn Step>> = vec![
        Box::new(EnsureDirStep {
            name: "ssh-dir",
            path: ssh_dir,
            mode: 0o700,
            owner: None,
        }),
        Box::new(KeypairStep { spec }),
        Box::new(KeyModesStep {
            private_path: private_path.clone(),
            public_path: public_path.clone(),
        }),
    ];

    let report = run_flow(&steps).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_report(&report);
        output::print_keygen_summary(&KeygenSummary {
            algorithm: settings.ssh.algorithm.clone(),
            private_path,
            public_path,
        });
    }
    Ok(())
}

fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

struct KeypairStep {
    spec: KeypairSpec,
}

#[async_trait]
impl Step for KeypairStep {
    fn name(&self) -> &'static str {
        "keypair"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        if keys::keypair_present(&self.spec.private_path).await {
            if self.spec.force {
                // Forced regeneration: not satisfied, the action replaces it.
                return Ok(false);
            }
            return Err(ProvisionError::validation(format!(
                "a key already exists at {}; pass --force to regenerate it",
                self.spec.private_path.display()
            )));
        }
        Ok(false)
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        keys::generate_keypair(&self.spec).await
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        Ok(keys::keypair_present(&self.spec.private_path).await)
    }
}

struct KeyModesStep {
    private_path: PathBuf,
    public_path: PathBuf,
}

impl KeyModesStep {
    async fn satisfied(&self) -> Result<bool, ProvisionError> {
        Ok(fs_util::has_mode(&self.private_path, PRIVATE_KEY_MODE).await?
            && fs_util::has_mode(&self.public_path, PUBLIC_KEY_MODE).await?)
    }
}

#[async_trait]
impl Step for KeyModesStep {
    fn name(&self) -> &'static str {
        "key-modes"
    }

    async fn check(&self) -> Result<bool, ProvisionError> {
        self.satisfied().await
    }

    async fn apply(&self) -> Result<(), ProvisionError> {
        fs_util::ensure_mode(&self.private_path, PRIVATE_KEY_MODE).await?;
        fs_util::ensure_mode(&self.public_path, PUBLIC_KEY_MODE).await
    }

    async fn verify(&self) -> Result<bool, ProvisionError> {
        self.satisfied().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home_on_tilde_path() {
        let expanded = expand_home(Path::new("~/.ssh/id_ed25519"), Path::new("/home/op"));
        assert_eq!(expanded, PathBuf::from("/home/op/.ssh/id_ed25519"));
    }

    #[test]
    fn test_expand_home_leaves_absolute_path() {
        let expanded = expand_home(Path::new("/etc/keys/id_rsa"), Path::new("/home/op"));
        assert_eq!(expanded, PathBuf::from("/etc/keys/id_rsa"));
    }
}
