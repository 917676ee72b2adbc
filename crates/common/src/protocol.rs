//! Invocation contract between the rotation framework and the handler.
//!
//! The event shape is fixed by Secrets Manager: it invokes the function once
//! per step with the secret id, the version token being rotated in, and the
//! step name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RotationError;

// ---------------------------------------------------------------------------
// Inbound event
// ---------------------------------------------------------------------------

/// One rotation step invocation.
///
/// `step` is kept as the raw string so that an unknown step can be rejected
/// after the version-staging checks, with a typed error rather than a
/// deserialisation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationEvent {
    /// Secret ARN or name.
    #[serde(rename = "SecretId")]
    pub secret_id: String,
    /// Version id of the secret being rotated in.
    #[serde(rename = "ClientRequestToken")]
    pub client_request_token: String,
    /// One of `createSecret`, `setSecret`, `testSecret`, `finishSecret`.
    #[serde(rename = "Step")]
    pub step: String,
}

/// The four phases of a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Create,
    Set,
    Test,
    Finish,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Create => "createSecret",
            Step::Set => "setSecret",
            Step::Test => "testSecret",
            Step::Finish => "finishSecret",
        }
    }
}

impl FromStr for Step {
    type Err = RotationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createSecret" => Ok(Step::Create),
            "setSecret" => Ok(Step::Set),
            "testSecret" => Ok(Step::Test),
            "finishSecret" => Ok(Step::Finish),
            other => Err(RotationError::UnknownVersionOrStage(format!(
                "invalid step parameter {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stage labels
// ---------------------------------------------------------------------------

/// Staging labels the rotation protocol moves between versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Current,
    Pending,
    Previous,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Current => "AWSCURRENT",
            Stage::Pending => "AWSPENDING",
            Stage::Previous => "AWSPREVIOUS",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step outcome
// ---------------------------------------------------------------------------

/// Successful result of a step.
///
/// `AlreadyDone` covers idempotent replays: the pending version already
/// exists, the token is already `AWSCURRENT`, and similar benign states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    AlreadyDone,
}
