//! Scripted scenarios: a replaying model and a simulated SUT.
//!
//! A scenario lists the known conformance statements and a set of runs. Each
//! run is a list of steps; each step names an action and the evidence lines
//! the simulated SUT logs while handling it. The model replays runs in order,
//! wrapping around, so a session can be longer than the script.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use suitegen_error::{GenError, Result};
use tracing::debug;

use crate::coverage::{Measurement, percent_of};
use crate::extractor::{Markers, strip_terminator};
use crate::harness::{LifecycleSignals, SystemUnderTest};
use crate::log_channel::{LogReceiver, LogSender, Severity, log_channel};
use crate::model::{BehaviorModel, ModelError, StepOutcome};

/// Logger name of the model trace channel.
pub const MODEL_SOURCE: &str = "mbt";
/// Logger name of the simulated SUT channel.
pub const SUT_SOURCE: &str = "MQTT broker";

const SERVE_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub action: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioFixture {
    /// Every statement the simulated SUT knows about.
    pub requirements: Vec<String>,
    pub runs: Vec<Vec<ScenarioStep>>,
}

impl ScenarioFixture {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let fixture: Self = serde_json::from_slice(&bytes).map_err(|err| {
            GenError::config(format!("{} parse failure: {err}", path.display()))
        })?;
        fixture.validate()?;
        Ok(fixture)
    }

    pub fn validate(&self) -> Result<()> {
        if self.runs.is_empty() {
            return Err(GenError::config("scenario must contain at least one run"));
        }
        if let Some(index) = self.runs.iter().position(Vec::is_empty) {
            return Err(GenError::config(format!("scenario run {index} has no steps")));
        }
        Ok(())
    }

    /// Wire a model and SUT together with their two log channels.
    pub fn build(&self, markers: Markers) -> Result<FixtureSession> {
        self.validate()?;
        let (model_tx, model_log) = log_channel("model");
        let (harness_tx, harness_log) = log_channel("harness");
        let (inbox_tx, inbox_rx) = mpsc::channel();
        Ok(FixtureSession {
            model: FixtureModel {
                runs: self.runs.clone(),
                run: 0,
                step: 0,
                log: model_tx.with_source(MODEL_SOURCE),
                sut: inbox_tx,
            },
            sut: FixtureSut {
                markers,
                requirements: self.requirements.clone(),
                inbox: Mutex::new(inbox_rx),
                log: harness_tx.with_source(SUT_SOURCE),
                state: Mutex::new(SutState::default()),
            },
            model_log,
            harness_log,
        })
    }
}

/// A ready-to-run model/SUT pair and the consumer ends of their logs.
#[derive(Debug)]
pub struct FixtureSession {
    pub model: FixtureModel,
    pub sut: FixtureSut,
    pub model_log: LogReceiver,
    pub harness_log: LogReceiver,
}

#[derive(Debug, Clone)]
struct FixtureAction {
    action: String,
    evidence: Vec<String>,
    last: bool,
}

/// Replays scenario runs one step at a time.
#[derive(Debug)]
pub struct FixtureModel {
    runs: Vec<Vec<ScenarioStep>>,
    run: usize,
    step: usize,
    log: LogSender,
    sut: Sender<FixtureAction>,
}

impl BehaviorModel for FixtureModel {
    fn step(&mut self) -> std::result::Result<StepOutcome, ModelError> {
        let run = &self.runs[self.run];
        let step = &run[self.step];
        let last = self.step + 1 == run.len();

        self.log.emit(Severity::Info, format!("step: {}", step.action));
        self.sut
            .send(FixtureAction {
                action: step.action.clone(),
                evidence: step.evidence.clone(),
                last,
            })
            .map_err(|_| ModelError("SUT is not accepting actions".to_owned()))?;

        if last {
            self.run = (self.run + 1) % self.runs.len();
            self.step = 0;
            Ok(StepOutcome::Restart)
        } else {
            self.step += 1;
            Ok(StepOutcome::Continue)
        }
    }
}

#[derive(Debug, Default)]
struct SutState {
    connection_open: bool,
    handled: u64,
    emitted: BTreeSet<String>,
}

/// Simulated SUT: logs window markers and evidence for each action.
///
/// Coverage is cumulative for the process lifetime; `reinitialize` only drops
/// the connection table.
#[derive(Debug)]
pub struct FixtureSut {
    markers: Markers,
    requirements: Vec<String>,
    inbox: Mutex<Receiver<FixtureAction>>,
    log: LogSender,
    state: Mutex<SutState>,
}

impl FixtureSut {
    /// Actions handled since the last reinitialization.
    #[must_use]
    pub fn handled(&self) -> u64 {
        self.state.lock().handled
    }

    fn handle(&self, action: &FixtureAction) {
        let mut state = self.state.lock();
        if !state.connection_open {
            self.log.info(self.markers.run_start.as_str());
            state.connection_open = true;
        }
        self.log.emit(Severity::Debug, format!("in: {}", action.action));
        for line in &action.evidence {
            self.log.info(line.as_str());
            state.emitted.insert(strip_terminator(line).to_owned());
        }
        state.handled += 1;
        if action.last {
            self.log.info(self.markers.run_end.as_str());
            state.connection_open = false;
        } else {
            self.log.info(self.markers.run_start.as_str());
        }
    }
}

impl SystemUnderTest for FixtureSut {
    fn name(&self) -> &str {
        "fixture"
    }

    fn serve(&self, signals: &LifecycleSignals) -> Result<()> {
        let inbox = self.inbox.lock();
        signals.notify_ready();
        while !signals.shutdown_requested() {
            match inbox.recv_timeout(SERVE_POLL) {
                Ok(action) => self.handle(&action),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("model disconnected; idling until shutdown");
                    while !signals.wait_for_shutdown(SERVE_POLL) {}
                }
            }
        }
        Ok(())
    }

    fn reinitialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.connection_open = false;
        state.handled = 0;
        Ok(())
    }

    fn measure(&self) -> Result<Measurement> {
        let state = self.state.lock();
        let total = self.requirements.len();
        let uncovered: Vec<&str> = self
            .requirements
            .iter()
            .map(|requirement| strip_terminator(requirement))
            .filter(|requirement| !state.emitted.contains(*requirement))
            .collect();
        let covered = u64::try_from(total - uncovered.len()).unwrap_or(u64::MAX);
        let total = u64::try_from(total).unwrap_or(u64::MAX);
        Ok(Measurement::new(
            format!(
                "conformance statements covered: {covered} of {total} = {}%",
                percent_of(covered, total)
            ),
            format!("uncovered: {}", uncovered.join(", ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::CoverageWireFormat;

    fn fixture() -> ScenarioFixture {
        ScenarioFixture {
            requirements: vec!["[MQTT-1] a".to_owned(), "[MQTT-2] b".to_owned()],
            runs: vec![vec![
                ScenarioStep {
                    action: "connect".to_owned(),
                    evidence: vec!["[MQTT-1] a".to_owned()],
                },
                ScenarioStep {
                    action: "disconnect".to_owned(),
                    evidence: Vec::new(),
                },
            ]],
        }
    }

    #[test]
    fn empty_scenarios_are_rejected() {
        let empty = ScenarioFixture {
            requirements: Vec::new(),
            runs: Vec::new(),
        };
        assert!(empty.validate().is_err());
        let hollow = ScenarioFixture {
            requirements: Vec::new(),
            runs: vec![Vec::new()],
        };
        assert!(hollow.validate().is_err());
    }

    #[test]
    fn model_logs_step_and_restarts_at_run_end() {
        let session = fixture().build(Markers::default()).expect("build");
        let mut model = session.model;
        assert_eq!(model.step().expect("step"), StepOutcome::Continue);
        assert_eq!(model.step().expect("step"), StepOutcome::Restart);
        assert_eq!(model.step().expect("wraps around"), StepOutcome::Continue);
        let lines: Vec<String> = session
            .model_log
            .drain_nowait()
            .into_iter()
            .map(|record| record.message)
            .collect();
        assert_eq!(lines, ["step: connect", "step: disconnect", "step: connect"]);
    }

    #[test]
    fn sut_brackets_actions_with_markers() {
        let session = fixture().build(Markers::default()).expect("build");
        let sut = session.sut;
        sut.handle(&FixtureAction {
            action: "connect".to_owned(),
            evidence: vec!["[MQTT-1] a".to_owned()],
            last: false,
        });
        sut.handle(&FixtureAction {
            action: "disconnect".to_owned(),
            evidence: Vec::new(),
            last: true,
        });
        let lines: Vec<String> = session
            .harness_log
            .drain_nowait()
            .into_iter()
            .map(|record| record.message)
            .collect();
        assert_eq!(
            lines,
            [
                "Waiting for request",
                "in: connect",
                "[MQTT-1] a",
                "Waiting for request",
                "in: disconnect",
                "Finishing communications",
            ]
        );
        assert_eq!(sut.handled(), 2);
        sut.reinitialize().expect("reinitialize");
        assert_eq!(sut.handled(), 0);
    }

    #[test]
    fn measure_reports_counts_and_uncovered() {
        let session = fixture().build(Markers::default()).expect("build");
        let sut = session.sut;
        sut.handle(&FixtureAction {
            action: "connect".to_owned(),
            evidence: vec!["[MQTT-1] a\n".to_owned()],
            last: true,
        });
        let measurement = sut.measure().expect("measure");
        assert_eq!(
            measurement.primary,
            "conformance statements covered: 1 of 2 = 50%"
        );
        assert_eq!(measurement.secondary, "uncovered: [MQTT-2] b");
        let snapshot = measurement
            .snapshot(CoverageWireFormat::CountsOfTotal)
            .expect("parse");
        assert_eq!(snapshot.covered, Some(1));
    }
}
