use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Primary error type for suite generation sessions.
///
/// Variants are grouped by the collaborator that failed. Everything except
/// storage writes and raw I/O is fatal to the session: the engine never
/// retries a harness or model fault on its own.
#[derive(Error, Debug)]
pub enum GenError {
    // === Harness Errors ===
    /// The SUT did not signal readiness within the start timeout.
    #[error("harness did not become ready within {waited:?}")]
    HarnessStartTimeout { waited: Duration },

    /// The SUT did not confirm termination within the stop timeout.
    #[error("harness did not terminate within {waited:?}")]
    HarnessStopTimeout { waited: Duration },

    /// The SUT reported a failure through its control surface.
    #[error("harness fault during {operation}: {detail}")]
    HarnessFault {
        operation: &'static str,
        detail: String,
    },

    // === Model Errors ===
    /// The behavioral model reported an internal error instead of a clean step.
    #[error("model fault at step {step}: {detail}")]
    ModelFault { step: u64, detail: String },

    /// The model kept stepping without ever concluding its run.
    #[error("model did not conclude a run within {max_steps} steps")]
    StepBudgetExceeded { max_steps: u64 },

    // === Log Stream Errors ===
    /// The producer side of a log channel went away while the consumer waited.
    #[error("log channel '{channel}' closed by its producer")]
    ChannelClosed { channel: String },

    /// No harness log record arrived within the drain timeout.
    #[error("no record on log channel '{channel}' within {waited:?}")]
    DrainTimeout { channel: String, waited: Duration },

    // === Storage Errors ===
    /// A transcript could not be written after all attempts.
    #[error("failed to write transcript '{path}' after {attempts} attempt(s): {source}")]
    StorageWrite {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    // === Coverage Errors ===
    /// The harness coverage string did not match the expected wire format.
    #[error("unparseable coverage measurement '{raw}': {detail}")]
    CoverageFormat { raw: String, detail: String },

    // === Configuration Errors ===
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    // === Bridge Errors ===
    /// The remote end of a bridge stayed unreachable for the whole retry budget.
    #[error("bridge '{name}' could not reach {host}:{port} after {attempts} attempt(s): {last_error}")]
    BridgeUnreachable {
        name: String,
        host: String,
        port: u16,
        attempts: u32,
        last_error: String,
    },

    /// A message could not be relayed to the remote end.
    #[error("bridge '{name}' failed to forward on '{topic}': {detail}")]
    BridgeForward {
        name: String,
        topic: String,
        detail: String,
    },

    // === I/O and Internal ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`GenError`], used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    Harness = 10,
    Model = 11,
    Channel = 12,
    Storage = 13,
    Coverage = 14,
    Config = 2,
    Bridge = 15,
    Io = 16,
    Internal = 70,
}

impl GenError {
    #[allow(clippy::match_same_arms)]
    pub const fn error_kind(&self) -> ErrorKind {
        match self {
            Self::HarnessStartTimeout { .. }
            | Self::HarnessStopTimeout { .. }
            | Self::HarnessFault { .. } => ErrorKind::Harness,
            Self::ModelFault { .. } | Self::StepBudgetExceeded { .. } => ErrorKind::Model,
            Self::ChannelClosed { .. } | Self::DrainTimeout { .. } => ErrorKind::Channel,
            Self::StorageWrite { .. } => ErrorKind::Storage,
            Self::CoverageFormat { .. } => ErrorKind::Coverage,
            Self::Config { .. } => ErrorKind::Config,
            Self::BridgeUnreachable { .. } | Self::BridgeForward { .. } => ErrorKind::Bridge,
            Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error ends the generation session.
    ///
    /// Raw I/O errors are the only ones a caller may retry locally; a
    /// `StorageWrite` has already exhausted its attempts.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Io(_))
    }

    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::HarnessStartTimeout { .. } => {
                Some("Increase start_timeout_ms or check that the SUT can bind its listener")
            }
            Self::HarnessStopTimeout { .. } => {
                Some("Increase stop_timeout_ms or check for SUT threads ignoring shutdown")
            }
            Self::StepBudgetExceeded { .. } => {
                Some("Raise max_steps_per_pass or check that the model reaches a restart state")
            }
            Self::DrainTimeout { .. } => {
                Some("Check the run-end marker matches the SUT's log phrasing")
            }
            Self::CoverageFormat { .. } => {
                Some("Select the coverage_format matching the harness version")
            }
            Self::StorageWrite { .. } => Some("Check free space and permissions of output_dir"),
            _ => None,
        }
    }

    pub const fn exit_code(&self) -> i32 {
        self.error_kind() as i32
    }

    pub fn harness_fault(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::HarnessFault {
            operation,
            detail: detail.into(),
        }
    }

    pub fn model_fault(step: u64, detail: impl Into<String>) -> Self {
        Self::ModelFault {
            step,
            detail: detail.into(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    pub fn coverage_format(raw: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::CoverageFormat {
            raw: raw.into(),
            detail: detail.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_start_timeout() {
        let err = GenError::HarnessStartTimeout {
            waited: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "harness did not become ready within 1.5s");
    }

    #[test]
    fn error_display_model_fault() {
        let err = GenError::model_fault(7, "unexpected PUBACK");
        assert_eq!(err.to_string(), "model fault at step 7: unexpected PUBACK");
    }

    #[test]
    fn error_display_storage_write() {
        let err = GenError::StorageWrite {
            path: PathBuf::from("tests/test.log.3"),
            attempts: 2,
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(
            err.to_string(),
            "failed to write transcript 'tests/test.log.3' after 2 attempt(s): disk full"
        );
    }

    #[test]
    fn error_kind_mapping() {
        assert_eq!(
            GenError::harness_fault("measure", "gone").error_kind(),
            ErrorKind::Harness
        );
        assert_eq!(
            GenError::StepBudgetExceeded { max_steps: 3 }.error_kind(),
            ErrorKind::Model
        );
        assert_eq!(
            GenError::ChannelClosed {
                channel: "harness".to_owned()
            }
            .error_kind(),
            ErrorKind::Channel
        );
        assert_eq!(GenError::config("x").error_kind(), ErrorKind::Config);
        assert_eq!(
            GenError::coverage_format("abc", "no percent").error_kind(),
            ErrorKind::Coverage
        );
    }

    #[test]
    fn fatality() {
        assert!(GenError::model_fault(1, "boom").is_fatal());
        assert!(
            GenError::HarnessStopTimeout {
                waited: Duration::from_secs(1)
            }
            .is_fatal()
        );
        assert!(!GenError::Io(std::io::Error::other("transient")).is_fatal());
    }

    #[test]
    fn suggestions() {
        assert!(
            GenError::HarnessStartTimeout {
                waited: Duration::ZERO
            }
            .suggestion()
            .is_some()
        );
        assert!(GenError::internal("bug").suggestion().is_none());
    }

    #[test]
    fn exit_codes_are_distinct_from_success() {
        assert_eq!(GenError::config("bad").exit_code(), 2);
        assert_ne!(GenError::internal("bug").exit_code(), 0);
    }
}
