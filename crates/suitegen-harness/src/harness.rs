//! SUT lifecycle control.
//!
//! The SUT serves on its own thread. `start` and `stop` block the caller on a
//! condition variable until the SUT reports the transition, bounded by a
//! timeout that is surfaced as a fatal error.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use suitegen_error::{GenError, Result};
use tracing::{debug, error, info, warn};

use crate::coverage::Measurement;

/// Lifecycle phase of the SUT as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SutPhase {
    Stopped,
    Starting,
    Ready,
    Stopping,
    Terminated,
}

#[derive(Debug)]
struct SignalState {
    phase: SutPhase,
    shutdown_requested: bool,
    failure: Option<String>,
}

/// Shared readiness/termination signals between the controller and the SUT
/// thread.
#[derive(Debug)]
pub struct LifecycleSignals {
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl LifecycleSignals {
    fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                phase: SutPhase::Stopped,
                shutdown_requested: false,
                failure: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Called by the SUT once it accepts interactions.
    pub fn notify_ready(&self) {
        let mut state = self.state.lock();
        if state.phase == SutPhase::Starting {
            state.phase = SutPhase::Ready;
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Polled by the SUT's serve loop.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.state.lock().shutdown_requested
    }

    /// Block the SUT thread until shutdown is requested or `timeout` passes.
    /// Returns `true` when shutdown was requested.
    pub fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.shutdown_requested {
            let _ = self.changed.wait_for(&mut state, timeout);
        }
        state.shutdown_requested
    }

    #[must_use]
    pub fn phase(&self) -> SutPhase {
        self.state.lock().phase
    }

    fn request_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown_requested = true;
        if state.phase == SutPhase::Ready || state.phase == SutPhase::Starting {
            state.phase = SutPhase::Stopping;
        }
        drop(state);
        self.changed.notify_all();
    }

    fn mark_terminated(&self, failure: Option<String>) {
        let mut state = self.state.lock();
        state.phase = SutPhase::Terminated;
        state.failure = failure;
        drop(state);
        self.changed.notify_all();
    }

    /// Wait until `done` holds for the phase, or the timeout passes.
    fn wait_until(&self, timeout: Duration, done: impl Fn(SutPhase) -> bool) -> Option<SutPhase> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !done(state.phase) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return done(state.phase).then_some(state.phase);
            }
        }
        Some(state.phase)
    }

    fn take_failure(&self) -> Option<String> {
        self.state.lock().failure.take()
    }
}

/// Control surface of a system under test.
///
/// `serve` runs on the harness thread and must call
/// [`LifecycleSignals::notify_ready`] once it accepts interactions, then
/// return promptly after [`LifecycleSignals::shutdown_requested`] turns true.
/// The other methods are called from the orchestrator thread while the SUT
/// is serving, so implementations synchronize their own state.
pub trait SystemUnderTest: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn serve(&self, signals: &LifecycleSignals) -> Result<()>;

    /// Reset retained data and connection tables without restarting.
    fn reinitialize(&self) -> Result<()>;

    /// Report coverage. Must not mutate SUT state.
    fn measure(&self) -> Result<Measurement>;
}

/// Owns the SUT thread and its lifecycle.
pub struct HarnessController<S: SystemUnderTest> {
    sut: Arc<S>,
    signals: Arc<LifecycleSignals>,
    worker: Option<JoinHandle<()>>,
    start_timeout: Duration,
    stop_timeout: Duration,
    reinitializations: u64,
}

impl<S: SystemUnderTest> HarnessController<S> {
    #[must_use]
    pub fn new(sut: S, start_timeout: Duration, stop_timeout: Duration) -> Self {
        Self {
            sut: Arc::new(sut),
            signals: Arc::new(LifecycleSignals::new()),
            worker: None,
            start_timeout,
            stop_timeout,
            reinitializations: 0,
        }
    }

    #[must_use]
    pub fn sut(&self) -> &S {
        &self.sut
    }

    #[must_use]
    pub fn phase(&self) -> SutPhase {
        self.signals.phase()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase() == SutPhase::Ready
    }

    /// Number of successful `reinitialize` calls.
    #[must_use]
    pub fn reinitializations(&self) -> u64 {
        self.reinitializations
    }

    /// Launch the SUT and wait for readiness.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(GenError::harness_fault("start", "harness already started"));
        }
        {
            let mut state = self.signals.state.lock();
            state.phase = SutPhase::Starting;
            state.shutdown_requested = false;
            state.failure = None;
        }

        let sut = Arc::clone(&self.sut);
        let signals = Arc::clone(&self.signals);
        let worker = thread::Builder::new()
            .name(format!("sut-{}", self.sut.name()))
            .spawn(move || {
                let outcome = sut.serve(&signals);
                if let Err(err) = &outcome {
                    error!(sut = sut.name(), error = %err, "SUT serve loop failed");
                }
                signals.mark_terminated(outcome.err().map(|err| err.to_string()));
            })?;
        self.worker = Some(worker);

        let started = Instant::now();
        let phase = self.signals.wait_until(self.start_timeout, |phase| {
            matches!(phase, SutPhase::Ready | SutPhase::Terminated)
        });
        match phase {
            Some(SutPhase::Ready) => {
                info!(
                    sut = self.sut.name(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "harness ready"
                );
                Ok(())
            }
            Some(_) => {
                self.join_worker();
                let detail = self
                    .signals
                    .take_failure()
                    .unwrap_or_else(|| "serve loop exited before readiness".to_owned());
                Err(GenError::harness_fault("start", detail))
            }
            None => {
                warn!(
                    sut = self.sut.name(),
                    timeout_ms = self.start_timeout.as_millis(),
                    "harness readiness timed out; requesting shutdown"
                );
                self.signals.request_shutdown();
                Err(GenError::HarnessStartTimeout {
                    waited: self.start_timeout,
                })
            }
        }
    }

    /// Request shutdown and wait for confirmed termination.
    pub fn stop(&mut self) -> Result<()> {
        if self.worker.is_none() {
            return Err(GenError::harness_fault("stop", "harness not started"));
        }
        self.signals.request_shutdown();
        let terminated = self
            .signals
            .wait_until(self.stop_timeout, |phase| phase == SutPhase::Terminated);
        if terminated.is_none() {
            return Err(GenError::HarnessStopTimeout {
                waited: self.stop_timeout,
            });
        }
        self.join_worker();
        info!(sut = self.sut.name(), "harness stopped");
        match self.signals.take_failure() {
            Some(detail) => Err(GenError::harness_fault("stop", detail)),
            None => Ok(()),
        }
    }

    pub fn reinitialize(&mut self) -> Result<()> {
        self.ensure_running("reinitialize")?;
        self.sut.reinitialize()?;
        self.reinitializations = self.reinitializations.saturating_add(1);
        debug!(
            sut = self.sut.name(),
            count = self.reinitializations,
            "harness reinitialized"
        );
        Ok(())
    }

    pub fn measure(&self) -> Result<Measurement> {
        self.ensure_running("measure")?;
        self.sut.measure()
    }

    fn ensure_running(&self, operation: &'static str) -> Result<()> {
        match self.phase() {
            SutPhase::Ready => Ok(()),
            phase => Err(GenError::harness_fault(
                operation,
                format!("SUT is not running (phase {phase:?})"),
            )),
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(sut = self.sut.name(), "SUT thread panicked");
            }
        }
    }
}

impl<S: SystemUnderTest> Drop for HarnessController<S> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.signals.request_shutdown();
            if self
                .signals
                .wait_until(self.stop_timeout, |phase| phase == SutPhase::Terminated)
                .is_some()
            {
                self.join_worker();
            } else {
                warn!(sut = self.sut.name(), "detaching SUT thread that ignored shutdown");
            }
        }
    }
}
