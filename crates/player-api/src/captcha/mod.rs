//! Two-tier captcha solving.
//!
//! The local solver is free but unreliable, the remote service is reliable
//! but billed per image. [`CaptchaPipeline::solve`] spends the local budget
//! first and escalates to the remote service at most once per challenge.

mod local;
mod remote;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use local::{CommandSolver, LocalSolution, LocalSolver, NoLocalSolver};
pub use remote::{RemoteSolver, TWO_CAPTCHA_BASE_URL, TwoCaptchaClient};

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("no local solver available")]
    SolverUnavailable,
    #[error("confidence {confidence:.2} below threshold")]
    LowConfidence { confidence: f64 },
    #[error("solver rejected image: {0}")]
    Rejected(String),
    #[error("timed out waiting for a solution")]
    Timeout,
    #[error("captcha service error: {0}")]
    Service(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveTier {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaOutcome {
    Solved { text: String, tier: SolveTier },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct CaptchaPolicy {
    /// Local solver passes before escalating.
    pub local_attempts: u32,
    /// Minimum confidence for a local reading to be submitted.
    pub min_confidence: f64,
}

impl Default for CaptchaPolicy {
    fn default() -> Self {
        Self {
            local_attempts: 4,
            min_confidence: 0.6,
        }
    }
}

pub struct CaptchaPipeline {
    local: Box<dyn LocalSolver>,
    remote: Option<Box<dyn RemoteSolver>>,
    policy: CaptchaPolicy,
}

impl CaptchaPipeline {
    pub fn new(
        local: Box<dyn LocalSolver>,
        remote: Option<Box<dyn RemoteSolver>>,
        policy: CaptchaPolicy,
    ) -> Self {
        Self {
            local,
            remote,
            policy,
        }
    }

    /// A pipeline with neither tier; every challenge fails.
    pub fn disabled() -> Self {
        Self::new(Box::new(NoLocalSolver), None, CaptchaPolicy::default())
    }

    pub fn policy(&self) -> &CaptchaPolicy {
        &self.policy
    }

    pub fn remote_configured(&self) -> bool {
        self.remote.as_ref().is_some_and(|r| r.is_configured())
    }

    /// Remote service balance, `None` when no remote service is configured.
    pub async fn remote_balance(&self) -> Option<Result<f64, CaptchaError>> {
        match &self.remote {
            Some(remote) if remote.is_configured() => Some(remote.balance().await),
            _ => None,
        }
    }

    /// Resolve one challenge image.
    pub async fn solve(&self, image: &[u8]) -> CaptchaOutcome {
        for attempt in 1..=self.policy.local_attempts {
            match self.local.solve(image).await {
                Ok(solution) if solution.passes(self.policy.min_confidence) => {
                    debug!(attempt, confidence = solution.confidence, "Local solver succeeded");
                    return CaptchaOutcome::Solved {
                        text: solution.text,
                        tier: SolveTier::Local,
                    };
                }
                Ok(solution) => {
                    let e = CaptchaError::LowConfidence {
                        confidence: solution.confidence,
                    };
                    debug!(attempt, error = %e, "Local solver result discarded");
                }
                Err(CaptchaError::SolverUnavailable) => {
                    debug!("No local solver, escalating");
                    break;
                }
                Err(e) => debug!(attempt, error = %e, "Local solver failed"),
            }
        }

        let Some(remote) = self.remote.as_ref().filter(|r| r.is_configured()) else {
            warn!("Local captcha solving exhausted and no remote solver is configured");
            return CaptchaOutcome::Failed {
                reason: "local solver exhausted, remote solver not configured".to_string(),
            };
        };

        info!(
            local_attempts = self.policy.local_attempts,
            "Escalating captcha to remote solver"
        );
        match remote.solve(&STANDARD.encode(image)).await {
            Ok(text) if !text.trim().is_empty() => CaptchaOutcome::Solved {
                text: text.trim().to_string(),
                tier: SolveTier::Remote,
            },
            Ok(_) => CaptchaOutcome::Failed {
                reason: "remote solver returned an empty answer".to_string(),
            },
            Err(e) => {
                warn!(error = %e, "Remote captcha solving failed");
                CaptchaOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
