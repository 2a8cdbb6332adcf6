use hostprep::Settings;
use hostprep::error::ProvisionError;
use hostprep::facts;
use hostprep::runner::Step;

use crate::cli::args::SshdArgs;
use crate::cli::output::{self, OutputOptions};
use crate::commands::steps::{EnsurePackagesStep, EnsureServiceStep, run_flow};

const SERVER_PACKAGE: &str = "openssh-server";

pub(crate) struct SshdSummary {
    pub(crate) unit: String,
}

pub(crate) async fn run(
    _args: &SshdArgs,
    settings: &Settings,
    options: OutputOptions,
) -> anyhow::Result<()> {
    let facts = facts::discover().await?;
    if !facts.has_systemctl {
        return Err(
            ProvisionError::validation("systemctl is required to manage the SSH daemon").into(),
        );
    }
    let unit = facts.ssh_service().to_string();

    let steps: Vec<Box<dyn Step>> = vec![
        Box::new(EnsurePackagesStep {
            name: "server-package",
            manager: facts.package_manager,
            packages: vec![SERVER_PACKAGE.to_string()],
            timeout: settings.command_timeout()?,
        }),
        Box::new(EnsureServiceStep {
            name: "sshd-service",
            unit: unit.clone(),
            poll_attempts: settings.service.poll_attempts,
            poll_interval: settings.poll_interval(),
        }),
    ];

    let report = run_flow(&steps).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_report(&report);
        output::print_sshd_summary(&SshdSummary { unit });
    }
    Ok(())
}
