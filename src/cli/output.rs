use hostprep::runner::{RunReport, StepOutcome, StepStatus};
use hostprep::secret::Secret;

use crate::commands::keygen::KeygenSummary;
use crate::commands::maas::MaasSummary;
use crate::commands::sshd::SshdSummary;
use crate::commands::user::UserSummary;

#[derive(Debug, Clone, Copy)]
pub(crate) struct OutputOptions {
    pub(crate) json: bool,
    pub(crate) show_secrets: bool,
}

pub(crate) fn display_secret(secret: &Secret, show_secrets: bool) -> String {
    if show_secrets {
        secret.expose().to_string()
    } else {
        secret.masked()
    }
}

pub(crate) fn print_report(report: &RunReport) {
    println!("Steps:");
    for outcome in &report.outcomes {
        print_outcome(outcome);
    }
}

/// Printed before aborting so the operator sees how far the run got.
pub(crate) fn print_completed(completed: &[StepOutcome]) {
    if completed.is_empty() {
        eprintln!("No steps completed before the failure.");
        return;
    }
    eprintln!("Steps completed before the failure:");
    for outcome in completed {
        eprintln!("  - {}: {}", outcome.name, status_text(outcome.status));
    }
}

fn print_outcome(outcome: &StepOutcome) {
    println!("  - {}: {}", outcome.name, status_text(outcome.status));
}

fn status_text(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Applied => "applied",
        StepStatus::AlreadySatisfied => "already satisfied",
    }
}

pub(crate) fn print_keygen_summary(summary: &KeygenSummary) {
    println!("Keypair:");
    println!("  - algorithm: {}", summary.algorithm);
    println!("  - private key: {}", summary.private_path.display());
    println!("  - public key: {}", summary.public_path.display());
}

pub(crate) fn print_user_summary(summary: &UserSummary) {
    println!("Management user:");
    println!("  - name: {}", summary.name);
    println!("  - home: {}", summary.home.display());
    println!("  - sudoers drop-in: {}", summary.dropin_path.display());
    match &summary.authorized_keys {
        Some(path) => println!("  - authorized keys: {}", path.display()),
        None => println!("  - authorized keys: not configured"),
    }
}

pub(crate) fn print_sshd_summary(summary: &SshdSummary) {
    println!("SSH daemon:");
    println!("  - unit: {} (enabled, active)", summary.unit);
}

pub(crate) fn print_maas_summary(summary: &MaasSummary, show_secrets: bool) {
    println!("MAAS controller:");
    println!("  - url: {}", summary.maas_url);
    println!("  - channel: {}", summary.channel);
    println!(
        "  - admin: {} <{}>",
        summary.admin_username, summary.admin_email
    );
    println!(
        "  - admin password: {}{}",
        display_secret(&summary.admin_password, show_secrets),
        generated_note(summary.admin_password_generated)
    );
    println!("  - database: {} (role {})", summary.db_name, summary.db_user);
    println!(
        "  - database password: {}{}",
        display_secret(&summary.db_password, show_secrets),
        generated_note(summary.db_password_generated)
    );
    println!("  - credentials: {}", summary.credentials_path.display());
    if !show_secrets {
        println!("  (pass --show-secrets to print secret values)");
    }
}

fn generated_note(generated: bool) -> &'static str {
    if generated { " (generated)" } else { "" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_secret_masks_when_hidden() {
        let secret = Secret::provided_password("supersecret".to_string());
        assert_eq!(display_secret(&secret, false), "****cret");
        assert_eq!(display_secret(&secret, true), "supersecret");
    }
}
