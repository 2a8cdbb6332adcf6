use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::error::ProvisionError;
use crate::exec::Cmd;
use crate::fs_util;

pub const PRIVATE_KEY_MODE: u32 = 0o600;
pub const PUBLIC_KEY_MODE: u32 = 0o644;

pub const SUPPORTED_ALGORITHMS: [&str; 3] = ["ed25519", "rsa", "ecdsa"];

/// What to generate and where.
#[derive(Debug, Clone)]
pub struct KeypairSpec {
    pub algorithm: String,
    pub bits: Option<u32>,
    pub comment: String,
    pub private_path: PathBuf,
    pub force: bool,
}

impl KeypairSpec {
    #[must_use]
    pub fn public_path(&self) -> PathBuf {
        public_path(&self.private_path)
    }
}

#[must_use]
pub fn public_path(private_path: &Path) -> PathBuf {
    let mut name = private_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".pub");
    private_path.with_file_name(name)
}

#[must_use]
pub fn keygen_args(spec: &KeypairSpec) -> Vec<String> {
    let mut args = vec!["-q".to_string(), "-t".to_string(), spec.algorithm.clone()];
    if let Some(bits) = spec.bits {
        args.push("-b".to_string());
        args.push(bits.to_string());
    }
    args.push("-C".to_string());
    args.push(spec.comment.clone());
    args.push("-N".to_string());
    args.push(String::new());
    args.push("-f".to_string());
    args.push(spec.private_path.display().to_string());
    args
}

/// Reports whether both halves of the keypair exist.
pub async fn keypair_present(private_path: &Path) -> bool {
    fs::try_exists(private_path).await.unwrap_or(false)
        && fs::try_exists(&public_path(private_path)).await.unwrap_or(false)
}

/// Generates an SSH keypair via `ssh-keygen`.
///
/// An existing key at the destination is refused unless `force` is set;
/// silently regenerating would invalidate already-distributed public keys.
/// With `force`, both halves are removed first so `ssh-keygen` cannot prompt.
///
/// # Errors
/// Returns `Validation` when a key already exists without `force`, and
/// `ActionFailed` when `ssh-keygen` fails.
pub async fn generate_keypair(spec: &KeypairSpec) -> Result<(), ProvisionError> {
    let exists = fs::try_exists(&spec.private_path).await.unwrap_or(false);
    if exists {
        if !spec.force {
            return Err(ProvisionError::validation(format!(
                "a key already exists at {}; pass --force to regenerate it",
                spec.private_path.display()
            )));
        }
        warn!(
            "regenerating existing keypair at {}",
            spec.private_path.display()
        );
        remove_if_present(&spec.private_path).await?;
        remove_if_present(&spec.public_path()).await?;
    }

    Cmd::new("ssh-keygen").args(keygen_args(spec)).run().await?;
    fs_util::ensure_mode(&spec.private_path, PRIVATE_KEY_MODE).await?;
    fs_util::ensure_mode(&spec.public_path(), PUBLIC_KEY_MODE).await?;
    info!("generated {} keypair at {}", spec.algorithm, spec.private_path.display());
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<(), ProvisionError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProvisionError::io(
            format!("failed to remove {}", path.display()),
            e,
        )),
    }
}
