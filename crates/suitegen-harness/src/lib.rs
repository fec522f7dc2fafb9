//! Model-driven conformance suite generation.
//!
//! A behavioral model is stepped against a system under test. Both sides log
//! into their own channel; the orchestrator interleaves the two streams into
//! one transcript per model run, keeps only conformance statements that have
//! never been seen before, and stores each transcript as a numbered test case.
//! Coverage reported by the harness decides when to stop early.

pub mod assembler;
pub mod bridge;
pub mod config;
pub mod coverage;
pub mod extractor;
pub mod fixture;
pub mod harness;
pub mod log_channel;
pub mod model;
pub mod orchestrator;
pub mod storage;

pub use assembler::{PassTranscript, TestCase, TestCaseAssembler};
pub use config::GenerationConfig;
pub use coverage::{CoverageSnapshot, CoverageWireFormat, Measurement};
pub use extractor::{ConformanceExtractor, ConformanceStatement, Markers};
pub use harness::{HarnessController, LifecycleSignals, SystemUnderTest};
pub use log_channel::{LogReceiver, LogRecord, LogSender, Severity, log_channel};
pub use model::{BehaviorModel, ModelDriver, ModelError, StepOutcome};
pub use orchestrator::{SessionReport, StopHandle, StopReason, SuiteOrchestrator};
pub use storage::{DirectoryStore, TranscriptStore};
