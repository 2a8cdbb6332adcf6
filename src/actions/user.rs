use std::path::PathBuf;

use tracing::info;

use crate::error::ProvisionError;
use crate::exec::Cmd;

/// A resolved system user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

#[must_use]
pub fn useradd_args(name: &str, shell: &str) -> Vec<String> {
    vec![
        "--create-home".to_string(),
        "--shell".to_string(),
        shell.to_string(),
        name.to_string(),
    ]
}

#[must_use]
pub fn usermod_group_args(user: &str, group: &str) -> Vec<String> {
    vec![
        "-aG".to_string(),
        group.to_string(),
        user.to_string(),
    ]
}

/// Reports whether the user exists.
///
/// # Errors
/// Returns an error when `id` cannot be executed at all.
pub async fn user_exists(name: &str) -> Result<bool, ProvisionError> {
    let output = Cmd::new("id").args(["-u", name]).output().await?;
    Ok(output.success)
}

/// Resolves a user name to uid, gid, and home directory.
///
/// # Errors
/// Returns `Validation` when the user does not exist or the passwd entry is
/// malformed.
pub async fn lookup_user(name: &str) -> Result<UserIdentity, ProvisionError> {
    let output = Cmd::new("getent").args(["passwd", name]).output().await?;
    if !output.success {
        return Err(ProvisionError::validation(format!(
            "user `{name}` does not exist"
        )));
    }
    parse_passwd_line(output.stdout_trimmed()).ok_or_else(|| {
        ProvisionError::validation(format!("malformed passwd entry for `{name}`"))
    })
}

/// Creates the user if missing: home directory, given shell, no password
/// (the account stays locked for password login). Re-running is a no-op.
///
/// # Errors
/// Returns `ActionFailed` when `useradd` fails.
pub async fn ensure_user(name: &str, shell: &str) -> Result<UserIdentity, ProvisionError> {
    if user_exists(name).await? {
        return lookup_user(name).await;
    }
    Cmd::new("useradd").args(useradd_args(name, shell)).run().await?;
    info!("created user {name}");
    lookup_user(name).await
}

/// Reports whether `user` is a member of `group`.
///
/// # Errors
/// Returns `ActionFailed` when group membership cannot be read.
pub async fn in_group(user: &str, group: &str) -> Result<bool, ProvisionError> {
    let output = Cmd::new("id").args(["-nG", user]).run().await?;
    Ok(parse_group_list(&output.stdout, group))
}

/// Adds `user` to `group` unless already a member.
///
/// # Errors
/// Returns `ActionFailed` when `usermod` fails.
pub async fn ensure_group_membership(user: &str, group: &str) -> Result<(), ProvisionError> {
    if in_group(user, group).await? {
        return Ok(());
    }
    Cmd::new("usermod")
        .args(usermod_group_args(user, group))
        .run()
        .await?;
    info!("added {user} to group {group}");
    Ok(())
}

fn parse_passwd_line(line: &str) -> Option<UserIdentity> {
    let mut fields = line.split(':');
    let name = fields.next()?.to_string();
    let _password = fields.next()?;
    let uid = fields.next()?.parse().ok()?;
    let gid = fields.next()?.parse().ok()?;
    let _gecos = fields.next()?;
    let home = PathBuf::from(fields.next()?);
    Some(UserIdentity {
        name,
        uid,
        gid,
        home,
    })
}

fn parse_group_list(output: &str, group: &str) -> bool {
    output.split_whitespace().any(|member| member == group)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_useradd_args() {
        assert_eq!(
            useradd_args("semaphore", "/bin/bash"),
            vec!["--create-home", "--shell", "/bin/bash", "semaphore"]
        );
    }

    #[test]
    fn test_usermod_group_args() {
        assert_eq!(
            usermod_group_args("semaphore", "sudo"),
            vec!["-aG", "sudo", "semaphore"]
        );
    }

    #[test]
    fn test_parse_passwd_line() {
        let identity =
            parse_passwd_line("semaphore:x:1001:1001:Semaphore:/home/semaphore:/bin/bash").unwrap();
        assert_eq!(identity.name, "semaphore");
        assert_eq!(identity.uid, 1001);
        assert_eq!(identity.gid, 1001);
        assert_eq!(identity.home, PathBuf::from("/home/semaphore"));
    }

    #[test]
    fn test_parse_passwd_line_rejects_garbage() {
        assert!(parse_passwd_line("not-a-passwd-line").is_none());
        assert!(parse_passwd_line("u:x:abc:1:g:/home/u:/bin/sh").is_none());
    }

    #[test]
    fn test_parse_group_list_exact_match() {
        assert!(parse_group_list("semaphore sudo adm\n", "sudo"));
        assert!(!parse_group_list("semaphore sudoer adm\n", "sudo"));
        assert!(!parse_group_list("", "sudo"));
    }
}
