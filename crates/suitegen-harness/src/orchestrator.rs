//! Top-level generation loop.
//!
//! ```text
//! Idle ──start──▶ Running(N) ──restart + window closed──▶ Evaluating(N)
//!                    ▲                                         │
//!                    └──────── budget left, not stopped ───────┤
//!                                                              ▼
//!                                                    Done ──stop──▶ report
//! ```
//!
//! A pass always runs to its run-end marker; stop requests and coverage
//! saturation are only checked between passes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use suitegen_error::Result;
use tracing::{debug, error, info, warn};

use crate::assembler::{PassTranscript, TestCaseAssembler};
use crate::config::GenerationConfig;
use crate::coverage::{CoverageSnapshot, Measurement};
use crate::extractor::{ExtractEvent, WindowState};
use crate::harness::{HarnessController, SystemUnderTest};
use crate::log_channel::LogReceiver;
use crate::model::{BehaviorModel, ModelDriver};
use crate::storage::TranscriptStore;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running { pass: u32 },
    Evaluating { pass: u32 },
    Done,
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BudgetExhausted,
    CoverageSaturated,
    StopRequested,
}

/// Requests a stop at the next pass boundary. Cloneable across threads.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What one pass produced.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass: u32,
    pub transcript: PathBuf,
    pub lines: usize,
    /// Statements first discovered in this pass.
    pub new_statements: Vec<String>,
    /// Session-wide discovered count after this pass.
    pub discovered_total: usize,
    pub measurement: Measurement,
    pub coverage: CoverageSnapshot,
}

/// Outcome of a whole session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub passes: Vec<PassReport>,
    pub stop_reason: StopReason,
    pub final_measurement: Measurement,
    pub final_coverage: CoverageSnapshot,
    /// Every statement identity discovered, sorted.
    pub discovered: Vec<String>,
    pub reinitializations: u64,
    pub model_steps: u64,
}

type PassObserver = Box<dyn FnMut(&PassReport)>;

/// Drives the model against the harness and turns each run into a stored
/// test case.
pub struct SuiteOrchestrator<S: SystemUnderTest, M: BehaviorModel, T: TranscriptStore> {
    config: GenerationConfig,
    harness: HarnessController<S>,
    driver: ModelDriver<M>,
    model_log: LogReceiver,
    harness_log: LogReceiver,
    store: T,
    assembler: TestCaseAssembler,
    state: SessionState,
    stop: StopHandle,
    observer: Option<PassObserver>,
}

impl<S: SystemUnderTest, M: BehaviorModel, T: TranscriptStore> SuiteOrchestrator<S, M, T> {
    /// `model_log` must be fed by `model`, `harness_log` by `sut`.
    pub fn new(
        config: GenerationConfig,
        sut: S,
        model: M,
        model_log: LogReceiver,
        harness_log: LogReceiver,
        store: T,
    ) -> Result<Self> {
        config.validate()?;
        let harness = HarnessController::new(sut, config.start_timeout(), config.stop_timeout());
        let driver = ModelDriver::new(model, config.max_steps_per_pass);
        let assembler = TestCaseAssembler::new(config.markers.clone());
        Ok(Self {
            config,
            harness,
            driver,
            model_log,
            harness_log,
            store,
            assembler,
            state: SessionState::Idle,
            stop: StopHandle::default(),
            observer: None,
        })
    }

    /// Called after each pass is evaluated.
    #[must_use]
    pub fn with_pass_observer(mut self, observer: impl FnMut(&PassReport) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn harness(&self) -> &HarnessController<S> {
        &self.harness
    }

    #[must_use]
    pub fn model(&self) -> &M {
        self.driver.model()
    }

    #[must_use]
    pub fn store(&self) -> &T {
        &self.store
    }

    /// Run the session to completion. Harness start/stop failures and every
    /// error raised mid-session are fatal; after a successful start the
    /// harness is stopped before the error is returned.
    pub fn run(&mut self) -> Result<SessionReport> {
        info!(
            budget = self.config.iteration_budget,
            output_dir = %self.config.output_dir.display(),
            "generation starting"
        );
        self.harness.start()?;

        let outcome = self.generate();
        let report = match outcome {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, state = ?self.state, "generation aborted");
                if let Err(stop_err) = self.harness.stop() {
                    warn!(error = %stop_err, "harness stop after abort failed");
                }
                self.state = SessionState::Done;
                return Err(err);
            }
        };

        self.harness.stop()?;
        self.state = SessionState::Done;
        info!(
            passes = report.passes.len(),
            stop_reason = ?report.stop_reason,
            coverage = %report.final_coverage,
            discovered = report.discovered.len(),
            "generation complete"
        );
        for line in [&report.final_measurement.primary, &report.final_measurement.secondary] {
            if !line.is_empty() {
                info!("{line}");
            }
        }
        Ok(report)
    }

    fn generate(&mut self) -> Result<SessionReport> {
        let mut passes = Vec::new();
        let mut previous: Option<CoverageSnapshot> = None;
        let mut sequence = 0_u32;

        let stop_reason = loop {
            sequence += 1;
            self.state = SessionState::Running { pass: sequence };
            let transcript = match self.run_pass(sequence) {
                Ok(transcript) => transcript,
                Err(err) => {
                    self.assembler.abandon_pass();
                    return Err(err);
                }
            };

            self.state = SessionState::Evaluating { pass: sequence };
            let report = self.evaluate(transcript, previous)?;
            previous = Some(report.coverage);
            let saturated = report.coverage.is_saturated();
            if let Some(observer) = self.observer.as_mut() {
                observer(&report);
            }
            passes.push(report);

            if sequence >= self.config.iteration_budget {
                break StopReason::BudgetExhausted;
            }
            if self.config.stop_on_full_coverage && saturated {
                break StopReason::CoverageSaturated;
            }
            if self.stop.is_requested() {
                break StopReason::StopRequested;
            }
        };

        let final_measurement = self.harness.measure()?;
        let final_coverage = final_measurement.snapshot(self.config.coverage_format)?;
        let report = SessionReport {
            passes,
            stop_reason,
            final_measurement,
            final_coverage,
            discovered: self.assembler.ledger().iter().map(str::to_owned).collect(),
            reinitializations: self.harness.reinitializations(),
            model_steps: self.driver.total_steps(),
        };
        self.store.persist_summary(&report)?;
        Ok(report)
    }

    /// Persist, measure, reinitialize.
    fn evaluate(
        &mut self,
        transcript: PassTranscript,
        previous: Option<CoverageSnapshot>,
    ) -> Result<PassReport> {
        let pass = transcript.test_case.sequence();
        let path = self.store.persist(&transcript.test_case)?;
        let measurement = self.harness.measure()?;
        let coverage = measurement.snapshot(self.config.coverage_format)?;
        self.harness.reinitialize()?;

        if let Some(previous) = previous {
            if coverage.percent < previous.percent {
                warn!(
                    pass,
                    previous = previous.percent,
                    current = coverage.percent,
                    "coverage regressed between passes"
                );
            }
        }
        if !transcript.is_productive() {
            debug!(pass, "pass discovered no new conformance statements");
        }
        info!(
            pass,
            primary = %measurement.primary,
            secondary = %measurement.secondary,
            delta = transcript.discovered.len(),
            "test created"
        );

        Ok(PassReport {
            pass,
            transcript: path,
            lines: transcript.test_case.lines().len(),
            new_statements: transcript
                .discovered
                .iter()
                .map(|statement| statement.text().to_owned())
                .collect(),
            discovered_total: self.assembler.ledger().len(),
            measurement,
            coverage,
        })
    }

    /// Step the model until it restarts and the harness window has closed.
    ///
    /// Once the window is closed, harness records are left queued for the
    /// next pass, where anything before its start marker is discarded.
    fn run_pass(&mut self, sequence: u32) -> Result<PassTranscript> {
        loop {
            let restarted = self.driver.step()?;
            self.drain_model_log();
            if self.assembler.window() != WindowState::Closed {
                self.drain_harness_step()?;
            }
            if restarted {
                if self.assembler.window() != WindowState::Closed {
                    self.drain_harness_until_closed()?;
                }
                self.drain_model_log();
                return Ok(self.assembler.finish_pass(sequence));
            }
        }
    }

    fn drain_model_log(&mut self) {
        for record in self.model_log.drain_nowait() {
            self.assembler.push_model_record(&record);
        }
    }

    /// Consume harness records up to the next step boundary or window close.
    fn drain_harness_step(&mut self) -> Result<()> {
        loop {
            let record = self.harness_log.pop_timeout(self.config.drain_timeout())?;
            match self.assembler.push_harness_record(&record) {
                ExtractEvent::StepBoundary | ExtractEvent::WindowClosed => return Ok(()),
                ExtractEvent::WindowOpened
                | ExtractEvent::Evidence(_)
                | ExtractEvent::Discarded => {}
            }
        }
    }

    fn drain_harness_until_closed(&mut self) -> Result<()> {
        while self.assembler.window() != WindowState::Closed {
            let record = self.harness_log.pop_timeout(self.config.drain_timeout())?;
            self.assembler.push_harness_record(&record);
        }
        Ok(())
    }
}
