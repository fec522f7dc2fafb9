//! Per-pass transcript assembly and session-wide deduplication.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::extractor::{
    ConformanceExtractor, ConformanceLedger, ConformanceStatement, ExtractEvent, Markers,
    WindowState, terminated,
};
use crate::log_channel::LogRecord;

/// One generation pass's transcript. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    sequence: u32,
    lines: Vec<String>,
}

impl TestCase {
    #[must_use]
    pub fn new(sequence: u32, lines: Vec<String>) -> Self {
        Self { sequence, lines }
    }

    /// Run sequence number, starting at 1.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Transcript lines in emission order, each `\n`-terminated.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Full file contents.
    #[must_use]
    pub fn render(&self) -> String {
        self.lines.concat()
    }
}

/// Output of a completed pass.
#[derive(Debug, Clone)]
pub struct PassTranscript {
    pub test_case: TestCase,
    /// Identities first discovered in this pass.
    pub discovered: BTreeSet<ConformanceStatement>,
}

impl PassTranscript {
    /// A pass is productive when it discovered at least one statement.
    #[must_use]
    pub fn is_productive(&self) -> bool {
        !self.discovered.is_empty()
    }
}

/// Accumulates the current pass's lines and owns the session ledger.
///
/// Statements discovered during a pass stay pending until
/// [`Self::finish_pass`]; [`Self::abandon_pass`] drops them with the partial
/// transcript so the ledger only ever reflects persisted passes.
#[derive(Debug)]
pub struct TestCaseAssembler {
    extractor: ConformanceExtractor,
    ledger: ConformanceLedger,
    lines: Vec<String>,
    pending: BTreeSet<ConformanceStatement>,
    model_lines: u64,
}

impl TestCaseAssembler {
    #[must_use]
    pub fn new(markers: Markers) -> Self {
        Self {
            extractor: ConformanceExtractor::new(markers),
            ledger: ConformanceLedger::new(),
            lines: Vec::new(),
            pending: BTreeSet::new(),
            model_lines: 0,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &ConformanceLedger {
        &self.ledger
    }

    #[must_use]
    pub fn window(&self) -> WindowState {
        self.extractor.window()
    }

    /// Lines accumulated so far in the current pass.
    #[must_use]
    pub fn pending_lines(&self) -> &[String] {
        &self.lines
    }

    /// Append a model trace record verbatim (terminator added if missing).
    pub fn push_model_record(&mut self, record: &LogRecord) {
        self.lines.push(terminated(&record.message));
        self.model_lines = self.model_lines.saturating_add(1);
    }

    /// Route a harness record through the extractor; new evidence is appended.
    pub fn push_harness_record(&mut self, record: &LogRecord) -> ExtractEvent {
        let ledger = &self.ledger;
        let pending = &self.pending;
        let event = self.extractor.feed(&record.message, |statement| {
            ledger.contains(statement) || pending.contains(statement)
        });
        if let ExtractEvent::Evidence(statement) = &event {
            self.lines.push(statement.transcript_line());
            self.pending.insert(statement.clone());
        }
        event
    }

    /// Close the pass: commit pending statements to the ledger and hand back
    /// the transcript.
    pub fn finish_pass(&mut self, sequence: u32) -> PassTranscript {
        let discovered = std::mem::take(&mut self.pending);
        for statement in &discovered {
            self.ledger.insert(statement);
        }
        let lines = std::mem::take(&mut self.lines);
        info!(
            pass = sequence,
            lines = lines.len(),
            model_lines = self.model_lines,
            discovered = discovered.len(),
            discarded = self.extractor.discarded(),
            total_seen = self.ledger.len(),
            "pass transcript assembled"
        );
        self.reset_pass_state();
        PassTranscript {
            test_case: TestCase::new(sequence, lines),
            discovered,
        }
    }

    /// Drop the in-progress pass without touching the ledger.
    pub fn abandon_pass(&mut self) {
        debug!(
            lines = self.lines.len(),
            pending = self.pending.len(),
            "abandoning partial pass transcript"
        );
        self.lines.clear();
        self.pending.clear();
        self.reset_pass_state();
    }

    fn reset_pass_state(&mut self) {
        self.extractor.reset();
        self.model_lines = 0;
    }
}
