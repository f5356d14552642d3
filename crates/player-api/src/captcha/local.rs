//! Local (free) captcha solving.
//!
//! The recognition itself is delegated to whatever implements
//! [`LocalSolver`]; the pipeline only looks at the text and the confidence
//! it reports.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

use super::CaptchaError;

/// Default time a solver program may take for one image.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(20);

/// Text read by a local solver together with its self-reported confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSolution {
    pub text: String,
    pub confidence: f64,
}

impl LocalSolution {
    /// Whether this reading is good enough to submit.
    pub fn passes(&self, min_confidence: f64) -> bool {
        self.confidence >= min_confidence
            && !self.text.is_empty()
            && self.text.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

#[async_trait]
pub trait LocalSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Result<LocalSolution, CaptchaError>;
}

/// Used when no local solver is installed; escalation happens immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocalSolver;

#[async_trait]
impl LocalSolver for NoLocalSolver {
    async fn solve(&self, _image: &[u8]) -> Result<LocalSolution, CaptchaError> {
        Err(CaptchaError::SolverUnavailable)
    }
}

/// Runs an external recognizer program.
///
/// The image bytes are written to the program's stdin; it must print
/// `TEXT CONFIDENCE` on the last line of stdout and exit successfully.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSolver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Parse a whitespace separated command line. Returns `None` when blank.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, image: &[u8]) -> Result<std::process::Output, CaptchaError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
            stdin.shutdown().await?;
        }

        Ok(child.wait_with_output().await?)
    }
}

/// Parse the `TEXT CONFIDENCE` line printed by a solver program.
fn parse_solver_output(stdout: &str) -> Result<LocalSolution, CaptchaError> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| CaptchaError::Rejected("solver printed nothing".to_string()))?;

    let mut fields = line.split_whitespace();
    let text = fields.next().unwrap_or_default().to_string();
    let confidence = fields
        .next()
        .and_then(|c| c.parse::<f64>().ok())
        .ok_or_else(|| CaptchaError::Rejected(format!("missing confidence in {line:?}")))?;

    Ok(LocalSolution { text, confidence })
}

#[async_trait]
impl LocalSolver for CommandSolver {
    async fn solve(&self, image: &[u8]) -> Result<LocalSolution, CaptchaError> {
        let output = tokio::time::timeout(self.timeout, self.run(image))
            .await
            .map_err(|_| CaptchaError::Timeout)??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptchaError::Rejected(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!(program = %self.program, output = %stdout.trim(), "Local solver output");
        parse_solver_output(&stdout)
    }
}
