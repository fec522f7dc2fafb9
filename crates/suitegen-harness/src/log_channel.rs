//! Ordered single-producer/single-consumer log record channels.
//!
//! Two independent channels exist per session: one fed by the behavioral
//! model's own trace, one fed by the harness (SUT) diagnostics. Producers
//! never block; the consumer can poll, wait, or wait with a deadline.
//!
//! The queue is unbounded and producers never wait on it. The orchestrator
//! drains after every model step, so depth stays within one step's output.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use suitegen_error::{GenError, Result};

/// Severity of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic record. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Wall-clock production time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub level: Severity,
    /// Logger name of the producer (e.g. `mbt`, `MQTT broker`).
    pub source: String,
    /// Rendered message text, exactly as the producer wrote it.
    pub message: String,
}

impl LogRecord {
    #[must_use]
    pub fn new(level: Severity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms: unix_millis(),
            level,
            source: source.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.level, self.timestamp_ms, self.source, self.message
        )
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

#[derive(Debug)]
struct ChannelState {
    queue: VecDeque<LogRecord>,
    producer_alive: bool,
    pushed: u64,
}

#[derive(Debug)]
struct ChannelShared {
    name: String,
    state: Mutex<ChannelState>,
    available: Condvar,
}

/// Create a named channel and return its producer and consumer ends.
#[must_use]
pub fn log_channel(name: impl Into<String>) -> (LogSender, LogReceiver) {
    let shared = Arc::new(ChannelShared {
        name: name.into(),
        state: Mutex::new(ChannelState {
            queue: VecDeque::new(),
            producer_alive: true,
            pushed: 0,
        }),
        available: Condvar::new(),
    });
    (
        LogSender {
            shared: Arc::clone(&shared),
            source: None,
        },
        LogReceiver { shared },
    )
}

/// Producer end. Not `Clone`: each channel has exactly one producer so that
/// delivery order is the producer's emission order.
#[derive(Debug)]
pub struct LogSender {
    shared: Arc<ChannelShared>,
    source: Option<String>,
}

impl LogSender {
    /// Default source name stamped by [`Self::emit`].
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Enqueue a record. Never blocks on consumer activity.
    pub fn push(&self, record: LogRecord) {
        let mut state = self.shared.state.lock();
        state.queue.push_back(record);
        state.pushed = state.pushed.saturating_add(1);
        drop(state);
        self.shared.available.notify_one();
    }

    /// Build and enqueue a record using this sender's source name.
    pub fn emit(&self, level: Severity, message: impl Into<String>) {
        let source = self
            .source
            .clone()
            .unwrap_or_else(|| self.shared.name.clone());
        self.push(LogRecord::new(level, source, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Severity::Info, message);
    }

    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.shared.name
    }
}

impl Drop for LogSender {
    fn drop(&mut self) {
        self.shared.state.lock().producer_alive = false;
        self.shared.available.notify_all();
    }
}

/// Consumer end.
#[derive(Debug)]
pub struct LogReceiver {
    shared: Arc<ChannelShared>,
}

impl LogReceiver {
    /// Next record, or `None` when nothing is queued right now.
    #[must_use]
    pub fn pop_nowait(&self) -> Option<LogRecord> {
        self.shared.state.lock().queue.pop_front()
    }

    /// Wait until a record exists.
    ///
    /// Queued records are still delivered after the producer is dropped;
    /// `ChannelClosed` is returned only once the queue is empty.
    pub fn pop_blocking(&self) -> Result<LogRecord> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(record) = state.queue.pop_front() {
                return Ok(record);
            }
            if !state.producer_alive {
                return Err(self.closed());
            }
            self.shared.available.wait(&mut state);
        }
    }

    /// Wait at most `timeout` for a record.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<LogRecord> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(record) = state.queue.pop_front() {
                return Ok(record);
            }
            if !state.producer_alive {
                return Err(self.closed());
            }
            if self
                .shared
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match state.queue.pop_front() {
                    Some(record) => Ok(record),
                    None => Err(GenError::DrainTimeout {
                        channel: self.shared.name.clone(),
                        waited: timeout,
                    }),
                };
            }
        }
    }

    /// Take every record currently queued, in push order.
    #[must_use]
    pub fn drain_nowait(&self) -> Vec<LogRecord> {
        self.shared.state.lock().queue.drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total records ever pushed on this channel.
    #[must_use]
    pub fn pushed_total(&self) -> u64 {
        self.shared.state.lock().pushed
    }

    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.shared.name
    }

    fn closed(&self) -> GenError {
        GenError::ChannelClosed {
            channel: self.shared.name.clone(),
        }
    }
}
