use std::time::Duration;

use tracing::{info, warn};

use crate::error::ProvisionError;
use crate::exec::Cmd;

const JOURNAL_TAIL_LINES: &str = "20";

/// Reports whether the unit is currently active.
///
/// # Errors
/// Returns an error when `systemctl` cannot be executed at all.
pub async fn is_active(name: &str) -> Result<bool, ProvisionError> {
    let output = Cmd::new("systemctl")
        .args(["is-active", "--quiet", name])
        .output()
        .await?;
    Ok(output.success)
}

/// Reports whether the unit is enabled to start at boot.
///
/// # Errors
/// Returns an error when `systemctl` cannot be executed at all.
pub async fn is_enabled(name: &str) -> Result<bool, ProvisionError> {
    let output = Cmd::new("systemctl")
        .args(["is-enabled", "--quiet", name])
        .output()
        .await?;
    Ok(output.success)
}

/// Enables and restarts the unit, then polls until it reports active.
///
/// On a unit that never becomes active, status output and a journal tail are
/// collected into a `ServiceFailure` so the operator sees why without
/// logging into the host.
///
/// # Errors
/// Returns `ActionFailed` when enable/restart themselves fail and
/// `ServiceFailure` when the unit stays inactive.
pub async fn ensure_enabled_and_running(
    name: &str,
    poll_attempts: u64,
    poll_interval: Duration,
) -> Result<(), ProvisionError> {
    Cmd::new("systemctl").args(["enable", name]).run().await?;
    Cmd::new("systemctl").args(["restart", name]).run().await?;

    for attempt in 1..=poll_attempts {
        if is_active(name).await? {
            info!("service {name} active after {attempt} poll(s)");
            return Ok(());
        }
        tokio::time::sleep(poll_interval).await;
    }

    warn!("service {name} did not reach active state; collecting diagnostics");
    let diagnostics = collect_diagnostics(name).await;
    Err(ProvisionError::ServiceFailure {
        service: name.to_string(),
        diagnostics,
    })
}

/// Best-effort status and journal tail for a failed unit. Collection
/// failures are folded into the text rather than masking the service
/// failure being reported.
pub async fn collect_diagnostics(name: &str) -> String {
    let mut diagnostics = String::new();

    match Cmd::new("systemctl")
        .args(["status", "--no-pager", name])
        .output()
        .await
    {
        Ok(output) => {
            diagnostics.push_str(output.stdout.trim());
        }
        Err(e) => diagnostics.push_str(&format!("(status unavailable: {e})")),
    }

    diagnostics.push('\n');
    match Cmd::new("journalctl")
        .args(["-u", name, "-n", JOURNAL_TAIL_LINES, "--no-pager"])
        .output()
        .await
    {
        Ok(output) => diagnostics.push_str(output.stdout.trim()),
        Err(e) => diagnostics.push_str(&format!("(journal unavailable: {e})")),
    }

    diagnostics
}
