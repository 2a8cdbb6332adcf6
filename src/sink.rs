use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::actions::user::UserIdentity;
use crate::error::ProvisionError;
use crate::fs_util;
use crate::secret::Secret;

pub const CREDENTIALS_MODE: u32 = 0o600;
pub const CREDENTIALS_DIR_MODE: u32 = 0o700;

/// A credentials record persisted as KEY=VALUE lines.
///
/// The record is owned by the invoking non-root user and written atomically:
/// mode 600 is in place before any content lands, and the canonical path is
/// only ever replaced by a complete file.
pub struct CredentialRecord {
    path: PathBuf,
    owner: Option<UserIdentity>,
    fields: Vec<(String, String)>,
}

impl CredentialRecord {
    #[must_use]
    pub fn new(path: PathBuf, owner: Option<UserIdentity>) -> Self {
        CredentialRecord {
            path,
            owner,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn push_secret(&mut self, key: impl Into<String>, secret: &Secret) {
        self.fields.push((key.into(), secret.expose().to_string()));
    }

    /// The serialized record. Field order is insertion order.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = String::new();
        let stamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| OffsetDateTime::now_utc().to_string());
        rendered.push_str(&format!("# written by hostprep at {stamp}\n"));
        for (key, value) in &self.fields {
            rendered.push_str(key);
            rendered.push('=');
            rendered.push_str(value);
            rendered.push('\n');
        }
        rendered
    }

    /// Compares the KEY=VALUE pairs in `contents` against this record,
    /// ignoring comment lines. Used as the persisted-state precondition.
    #[must_use]
    pub fn matches_contents(&self, contents: &str) -> bool {
        let existing: Vec<(&str, &str)> = contents
            .lines()
            .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
            .filter_map(|line| line.split_once('='))
            .collect();
        existing.len() == self.fields.len()
            && self
                .fields
                .iter()
                .zip(existing)
                .all(|((key, value), (ekey, evalue))| key == ekey && value == evalue)
    }

    /// Persists the record.
    ///
    /// # Errors
    /// Returns `Io` when the directory, write, rename, or ownership transfer
    /// fails, and `Validation` when the destination path is degenerate.
    pub async fn persist(&self) -> Result<PathBuf, ProvisionError> {
        let parent = self.path.parent().ok_or_else(|| {
            ProvisionError::validation(format!(
                "{} has no parent directory",
                self.path.display()
            ))
        })?;
        fs_util::ensure_dir(parent, CREDENTIALS_DIR_MODE).await?;
        if let Some(owner) = &self.owner {
            fs_util::ensure_owner(parent, owner.uid, owner.gid)?;
        }

        fs_util::write_atomic(&self.path, self.render().as_bytes(), CREDENTIALS_MODE).await?;
        if let Some(owner) = &self.owner {
            fs_util::ensure_owner(&self.path, owner.uid, owner.gid)?;
        }
        info!("persisted credentials at {}", self.path.display());
        Ok(self.path.clone())
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Field values may be secrets; only keys are shown.
        f.debug_struct("CredentialRecord")
            .field("path", &self.path)
            .field(
                "fields",
                &self.fields.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: PathBuf) -> CredentialRecord {
        let mut record = CredentialRecord::new(path, None);
        record.push("MAAS_ADMIN_USER", "admin");
        record.push("MAAS_ADMIN_PASSWORD", "hunter2hunter2");
        record
    }

    #[test]
    fn test_render_preserves_field_order() {
        let record = record(PathBuf::from("/tmp/maas.creds"));
        let rendered = record.render();
        let admin = rendered.find("MAAS_ADMIN_USER=admin").unwrap();
        let password = rendered.find("MAAS_ADMIN_PASSWORD=hunter2hunter2").unwrap();
        assert!(admin < password);
        assert!(rendered.starts_with("# written by hostprep"));
    }

    #[test]
    fn test_matches_contents_ignores_comments() {
        let record = record(PathBuf::from("/tmp/maas.creds"));
        let rendered = record.render();
        assert!(record.matches_contents(&rendered));
        assert!(!record.matches_contents("MAAS_ADMIN_USER=other\n"));
        assert!(!record.matches_contents(""));
    }

    #[tokio::test]
    async fn test_persist_writes_mode_600() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maas").join("maas.creds");
        let record = record(path.clone());

        let written = record.persist().await.unwrap();

        assert_eq!(written, path);
        assert!(fs_util::has_mode(&path, CREDENTIALS_MODE).await.unwrap());
        assert!(
            fs_util::has_mode(path.parent().unwrap(), CREDENTIALS_DIR_MODE)
                .await
                .unwrap()
        );
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(record.matches_contents(&contents));
    }
}
