use anyhow::{Context, Result};
use clap::Parser;
use hostprep::Settings;
use hostprep::error::ProvisionError;

mod cli;
mod commands;

use crate::cli::args::{Cli, CliCommand};
use crate::cli::output::OutputOptions;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        let (category, code) = classify(&err);
        eprintln!("hostprep error [{category}]: {err:#}");
        std::process::exit(code);
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Maps the failure to its category and exit code. Anything outside the
/// provisioning taxonomy (runtime setup, serialization) exits 1.
fn classify(err: &anyhow::Error) -> (&'static str, i32) {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ProvisionError>())
        .map_or(("error", 1), |provision| {
            (provision.category(), provision.exit_code())
        })
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::new(cli.config.clone()).map_err(|e| {
        ProvisionError::validation(format!("failed to load configuration: {e}"))
    })?;
    let options = OutputOptions {
        json: cli.json,
        show_secrets: cli.show_secrets,
    };

    let runtime =
        tokio::runtime::Runtime::new().context("Failed to initialize async runtime")?;

    match &cli.command {
        CliCommand::Keygen(args) => {
            args.apply(&mut settings);
            settings.validate()?;
            runtime.block_on(commands::keygen::run(args, &settings, options))?;
        }
        CliCommand::User(args) => {
            args.apply(&mut settings);
            settings.validate()?;
            runtime.block_on(commands::user::run(args, &settings, options))?;
        }
        CliCommand::Sshd(args) => {
            args.apply(&mut settings);
            settings.validate()?;
            runtime.block_on(commands::sshd::run(args, &settings, options))?;
        }
        CliCommand::Maas(args) => {
            args.apply(&mut settings);
            settings.validate()?;
            runtime.block_on(commands::maas::run(args, &settings, options))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_finds_provision_error_in_chain() {
        let err = anyhow::Error::from(ProvisionError::Download {
            url: "http://example.com/key".to_string(),
            detail: "server returned 404".to_string(),
        })
        .context("installing authorized key");
        let (category, code) = classify(&err);
        assert_eq!(category, "download");
        assert_eq!(code, 6);
    }

    #[test]
    fn test_classify_defaults_for_foreign_errors() {
        let err = anyhow::anyhow!("something else");
        let (category, code) = classify(&err);
        assert_eq!(category, "error");
        assert_eq!(code, 1);
    }
}
