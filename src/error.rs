use thiserror::Error;

/// Error taxonomy for a provisioning run.
///
/// Every failure a step can produce maps to exactly one variant, and every
/// variant maps to a stable process exit code so scriptable callers can
/// branch on the failure class.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Bad input: malformed URL, empty required field, refused overwrite.
    #[error("{0}")]
    Validation(String),

    /// An OS command exited non-zero or could not be run at all.
    #[error("command `{command}` failed: {detail}")]
    ActionFailed { command: String, detail: String },

    /// The action reported success but the postcondition still does not hold.
    #[error("verification failed: {diagnostic}")]
    VerificationFailed { diagnostic: String },

    /// A service did not reach active state after enable + restart.
    #[error("service '{service}' failed to reach active state\n{diagnostics}")]
    ServiceFailure {
        service: String,
        diagnostics: String,
    },

    /// Remote key download failed after URL validation passed.
    #[error("download failed for {url}: {detail}")]
    Download { url: String, detail: String },

    /// The sudoers syntax checker rejected a written drop-in.
    #[error("sudoers drop-in rejected: {detail}")]
    SudoersRejected { detail: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A step failed; wraps the underlying cause with the step name.
    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    pub fn validation(message: impl Into<String>) -> Self {
        ProvisionError::Validation(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            ProvisionError::Validation(_) => "validation",
            ProvisionError::ActionFailed { .. } => "action-failed",
            ProvisionError::VerificationFailed { .. } => "verification-failed",
            ProvisionError::ServiceFailure { .. } => "service-failure",
            ProvisionError::Download { .. } => "download",
            ProvisionError::SudoersRejected { .. } => "config",
            ProvisionError::Io { .. } => "io",
            ProvisionError::Step { source, .. } => source.category(),
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::Validation(_) => 2,
            ProvisionError::ActionFailed { .. } => 3,
            ProvisionError::VerificationFailed { .. } => 4,
            ProvisionError::ServiceFailure { .. } => 5,
            ProvisionError::Download { .. } => 6,
            ProvisionError::SudoersRejected { .. } => 7,
            ProvisionError::Io { .. } => 8,
            ProvisionError::Step { source, .. } => source.exit_code(),
        }
    }
}
