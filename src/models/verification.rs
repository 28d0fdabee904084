use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of post-acquisition audio verification.
///
/// The verifier fails open: only a confident mismatch produces `Fail`;
/// every infrastructure problem or ambiguity maps to `Skip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationOutcome {
    Pass,
    Fail,
    Skip,
    Disabled,
}

impl VerificationOutcome {
    /// Anything but a confident `Fail` lets the file through.
    pub fn keeps_file(&self) -> bool {
        !matches!(self, VerificationOutcome::Fail)
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationOutcome::Pass => "pass",
            VerificationOutcome::Fail => "fail",
            VerificationOutcome::Skip => "skip",
            VerificationOutcome::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Outcome plus the human-readable reason that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub outcome: VerificationOutcome,
    pub reason: String,
}

impl VerificationReport {
    pub fn new(outcome: VerificationOutcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            reason: reason.into(),
        }
    }

    pub fn pass(reason: impl Into<String>) -> Self {
        Self::new(VerificationOutcome::Pass, reason)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new(VerificationOutcome::Fail, reason)
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::new(VerificationOutcome::Skip, reason)
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::new(VerificationOutcome::Disabled, reason)
    }
}
