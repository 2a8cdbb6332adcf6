use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::error::ProvisionError;
use crate::exec::Cmd;
use crate::fs_util;

pub const DROPIN_MODE: u32 = 0o440;
const DEFAULT_VALIDATOR: &str = "visudo";

#[must_use]
pub fn dropin_path(user: &str) -> PathBuf {
    PathBuf::from(format!("/etc/sudoers.d/99-{user}-nopasswd"))
}

#[must_use]
pub fn dropin_contents(user: &str) -> String {
    format!("{user} ALL=(ALL) NOPASSWD:ALL\n")
}

/// Reports whether the drop-in already holds the expected rule with the
/// required mode.
///
/// # Errors
/// Returns an error on read failures other than "not found".
pub async fn dropin_satisfied(user: &str, path: &Path) -> Result<bool, ProvisionError> {
    if !fs_util::has_mode(path, DROPIN_MODE).await? {
        return Ok(false);
    }
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(contents == dropin_contents(user)),
        Err(_) => Ok(false),
    }
}

/// Writes the NOPASSWD drop-in for `user` and validates it with the system
/// sudoers checker. A rejected file is removed before the error is returned,
/// so no partial privilege grant is ever left behind.
///
/// # Errors
/// Returns `SudoersRejected` when the validator rejects the written file and
/// I/O or `ActionFailed` errors otherwise.
pub async fn ensure_dropin(user: &str, path: &Path) -> Result<(), ProvisionError> {
    write_validated_dropin(user, path, DEFAULT_VALIDATOR).await
}

/// The validator program is a parameter so the remove-on-rejection contract
/// is testable without root.
pub async fn write_validated_dropin(
    user: &str,
    path: &Path,
    validator: &str,
) -> Result<(), ProvisionError> {
    let contents = dropin_contents(user);
    fs_util::write_atomic(path, contents.as_bytes(), DROPIN_MODE).await?;

    let path_arg = path.display().to_string();
    let check = Cmd::new(validator)
        .args(["-c", "-f", path_arg.as_str()])
        .output()
        .await;
    let failure = match check {
        Ok(output) if output.success => {
            info!("sudoers drop-in validated at {}", path.display());
            return Ok(());
        }
        Ok(output) => ProvisionError::SudoersRejected {
            detail: {
                let text = if output.stderr.trim().is_empty() {
                    output.stdout.trim()
                } else {
                    output.stderr.trim()
                };
                format!("{validator} rejected {}: {text}", path.display())
            },
        },
        Err(e) => e,
    };

    // Never leave an unvalidated rule in sudoers.d.
    let _ = fs::remove_file(path).await;
    Err(failure)
}
