use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hostprep::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Path to hostprep.toml
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Emit the run report as JSON on stdout
    #[arg(long, global = true)]
    pub(crate) json: bool,

    /// Show secrets in output summaries
    #[arg(long, global = true)]
    pub(crate) show_secrets: bool,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Generate an SSH keypair for the invoking user
    Keygen(KeygenArgs),
    /// Create the management user with passwordless sudo
    User(UserArgs),
    /// Install, enable, and verify the SSH daemon
    Sshd(SshdArgs),
    /// Install and configure a MAAS controller with a local PostgreSQL
    Maas(MaasArgs),
}

#[derive(Args, Debug)]
pub(crate) struct KeygenArgs {
    /// Private key path (`~` expands to the invoking user's home)
    #[arg(long)]
    pub(crate) key_path: Option<PathBuf>,

    /// Key algorithm (ed25519, rsa, ecdsa)
    #[arg(long)]
    pub(crate) algorithm: Option<String>,

    /// Key strength in bits (rsa only)
    #[arg(long)]
    pub(crate) bits: Option<u32>,

    /// Key comment
    #[arg(long)]
    pub(crate) comment: Option<String>,

    /// Overwrite an existing keypair at the destination
    #[arg(long)]
    pub(crate) force: bool,
}

impl KeygenArgs {
    pub(crate) fn apply(&self, settings: &mut Settings) {
        if let Some(key_path) = &self.key_path {
            key_path.clone_into(&mut settings.ssh.key_path);
        }
        if let Some(algorithm) = &self.algorithm {
            algorithm.clone_into(&mut settings.ssh.algorithm);
        }
        if let Some(bits) = self.bits {
            settings.ssh.bits = Some(bits);
        }
        if let Some(comment) = &self.comment {
            comment.clone_into(&mut settings.ssh.comment);
        }
    }
}

#[derive(Args, Debug)]
pub(crate) struct UserArgs {
    /// Management user name
    #[arg(long)]
    pub(crate) name: Option<String>,

    /// Login shell for the management user
    #[arg(long)]
    pub(crate) shell: Option<String>,

    /// URL of a public key to install as authorized_keys
    #[arg(long, env = "HOSTPREP_AUTHORIZED_KEY_URL")]
    pub(crate) authorized_key_url: Option<String>,
}

impl UserArgs {
    pub(crate) fn apply(&self, settings: &mut Settings) {
        if let Some(name) = &self.name {
            name.clone_into(&mut settings.user.name);
        }
        if let Some(shell) = &self.shell {
            shell.clone_into(&mut settings.user.shell);
        }
        if let Some(url) = &self.authorized_key_url {
            settings.ssh.authorized_key_url = Some(url.clone());
        }
    }
}

#[derive(Args, Debug)]
pub(crate) struct SshdArgs {
    /// Polls before declaring the daemon failed
    #[arg(long)]
    pub(crate) poll_attempts: Option<u64>,

    /// Seconds between polls
    #[arg(long)]
    pub(crate) poll_interval_secs: Option<u64>,
}

impl SshdArgs {
    pub(crate) fn apply(&self, settings: &mut Settings) {
        if let Some(attempts) = self.poll_attempts {
            settings.service.poll_attempts = attempts;
        }
        if let Some(interval) = self.poll_interval_secs {
            settings.service.poll_interval_secs = interval;
        }
    }
}

#[derive(Args, Debug)]
pub(crate) struct MaasArgs {
    /// Snap channel to install MAAS from
    #[arg(long)]
    pub(crate) channel: Option<String>,

    /// URL the MAAS region API is reachable on
    #[arg(long)]
    pub(crate) maas_url: Option<String>,

    /// Database name
    #[arg(long)]
    pub(crate) db_name: Option<String>,

    /// Database role
    #[arg(long)]
    pub(crate) db_user: Option<String>,

    /// Database password (generated when absent)
    #[arg(long, env = "HOSTPREP_DB_PASSWORD", hide_env_values = true)]
    pub(crate) db_password: Option<String>,

    /// MAAS admin user name
    #[arg(long)]
    pub(crate) admin_username: Option<String>,

    /// MAAS admin email
    #[arg(long)]
    pub(crate) admin_email: Option<String>,

    /// MAAS admin password (generated when absent)
    #[arg(long, env = "HOSTPREP_ADMIN_PASSWORD", hide_env_values = true)]
    pub(crate) admin_password: Option<String>,

    /// Owner of the credentials record (defaults to the invoking user)
    #[arg(long)]
    pub(crate) credentials_owner: Option<String>,
}

impl MaasArgs {
    pub(crate) fn apply(&self, settings: &mut Settings) {
        if let Some(channel) = &self.channel {
            channel.clone_into(&mut settings.maas.channel);
        }
        if let Some(url) = &self.maas_url {
            url.clone_into(&mut settings.maas.url);
        }
        if let Some(name) = &self.db_name {
            name.clone_into(&mut settings.db.name);
        }
        if let Some(user) = &self.db_user {
            user.clone_into(&mut settings.db.user);
        }
        if let Some(password) = &self.db_password {
            settings.db.password = Some(password.clone());
        }
        if let Some(username) = &self.admin_username {
            username.clone_into(&mut settings.maas.admin_username);
        }
        if let Some(email) = &self.admin_email {
            email.clone_into(&mut settings.maas.admin_email);
        }
        if let Some(password) = &self.admin_password {
            settings.maas.admin_password = Some(password.clone());
        }
        if let Some(owner) = &self.credentials_owner {
            settings.credentials.owner = Some(owner.clone());
        }
    }
}
