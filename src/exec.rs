use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::ProvisionError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_DETAIL_BYTES: usize = 4096;

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CmdOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    #[must_use]
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// A single external command invocation.
///
/// All subprocess execution funnels through this type: output is captured,
/// a timeout always applies, and a non-zero exit maps to
/// [`ProvisionError::ActionFailed`] carrying the command line and stderr.
/// When arguments contain secret material, set a `label` — the label is what
/// appears in logs and error messages instead of the rendered command line.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    label: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Cmd {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
            label: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides what this command is called in logs and error messages.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The command line as shown to humans. Environment values and stdin are
    /// never part of it.
    #[must_use]
    pub fn display(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => render_command(&self.program, &self.args),
        }
    }

    /// Runs the command and returns its output regardless of exit status.
    ///
    /// # Errors
    /// Returns `ActionFailed` when the command cannot be spawned or exceeds
    /// its timeout.
    pub async fn output(mut self) -> Result<CmdOutput, ProvisionError> {
        let display_line = self.display();
        debug!("running: {}", display_line);

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| ProvisionError::ActionFailed {
            command: display_line.clone(),
            detail: format!("failed to spawn: {e}"),
        })?;

        if let Some(bytes) = self.stdin.take() {
            let mut handle = child.stdin.take().ok_or_else(|| ProvisionError::ActionFailed {
                command: display_line.clone(),
                detail: "stdin handle unavailable".to_string(),
            })?;
            handle
                .write_all(&bytes)
                .await
                .map_err(|e| ProvisionError::ActionFailed {
                    command: display_line.clone(),
                    detail: format!("failed to write stdin: {e}"),
                })?;
            drop(handle);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProvisionError::ActionFailed {
                command: display_line.clone(),
                detail: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| ProvisionError::ActionFailed {
                command: display_line,
                detail: format!("failed to collect output: {e}"),
            })?;

        Ok(CmdOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Runs the command and requires a zero exit status.
    ///
    /// # Errors
    /// Returns `ActionFailed` on spawn failure, timeout, or non-zero exit,
    /// with stderr (or stdout when stderr is empty) in the detail.
    pub async fn run(self) -> Result<CmdOutput, ProvisionError> {
        let display = self.display();
        let output = self.output().await?;
        if output.success {
            Ok(output)
        } else {
            Err(ProvisionError::ActionFailed {
                command: display,
                detail: failure_detail(&output),
            })
        }
    }
}

#[must_use]
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            rendered.push('\'');
            rendered.push_str(arg);
            rendered.push('\'');
        } else {
            rendered.push_str(arg);
        }
    }
    rendered
}

fn failure_detail(output: &CmdOutput) -> String {
    let stream = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    let mut detail = match output.code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    };
    if !stream.is_empty() {
        detail.push_str(": ");
        detail.push_str(truncate(stream, MAX_DETAIL_BYTES));
    }
    detail
}

fn truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_command_quotes_whitespace() {
        let args = vec!["-c".to_string(), "echo hi".to_string()];
        assert_eq!(render_command("sh", &args), "sh -c 'echo hi'");
    }

    #[test]
    fn test_render_command_quotes_empty_args() {
        let args = vec!["-N".to_string(), String::new()];
        assert_eq!(render_command("ssh-keygen", &args), "ssh-keygen -N ''");
    }

    #[test]
    fn test_display_prefers_label() {
        let cmd = Cmd::new("psql").arg("--command").arg("secret").label("psql (create role)");
        assert_eq!(cmd.display(), "psql (create role)");
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let output = Cmd::new("sh")
            .args(["-c", "printf hello"])
            .run()
            .await
            .unwrap();
        assert_eq!(output.stdout_trimmed(), "hello");
    }

    #[tokio::test]
    async fn test_run_maps_nonzero_exit() {
        let err = Cmd::new("sh")
            .args(["-c", "echo oops >&2; exit 3"])
            .run()
            .await
            .unwrap_err();
        match err {
            ProvisionError::ActionFailed { detail, .. } => {
                assert!(detail.contains("exit code 3"));
                assert!(detail.contains("oops"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_output_reports_nonzero_without_error() {
        let output = Cmd::new("sh").args(["-c", "exit 1"]).output().await.unwrap();
        assert!(!output.success);
        assert_eq!(output.code, Some(1));
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let output = Cmd::new("cat").stdin("piped").run().await.unwrap();
        assert_eq!(output.stdout, "piped");
    }

    #[tokio::test]
    async fn test_missing_program_is_action_failed() {
        let err = Cmd::new("hostprep-no-such-binary").run().await.unwrap_err();
        assert!(matches!(err, ProvisionError::ActionFailed { .. }));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo";
        let cut = truncate(text, 2);
        assert!(cut.len() <= 2);
        assert!(text.starts_with(cut));
    }
}
