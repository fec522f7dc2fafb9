//! Classification of harness log messages into conformance evidence and
//! run-boundary signals.
//!
//! The SUT's log phrasing is the integration contract: [`Markers`] holds the
//! only strings that couple the engine to it, and [`Markers::classify`] is the
//! only place they are matched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Marker phrases recognized in harness log messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Markers {
    /// "Ready for next interaction": opens a capture window, or marks a step
    /// boundary inside an open one.
    pub run_start: String,
    /// "Interaction sequence finished": closes the capture window.
    pub run_end: String,
    /// Opening of a bracketed requirement tag, e.g. `[MQTT-`.
    pub conformance_tag: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            run_start: "Waiting for request".to_owned(),
            run_end: "Finishing communications".to_owned(),
            conformance_tag: "[MQTT-".to_owned(),
        }
    }
}

/// Result of classifying a single harness message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    RunStart,
    RunEnd,
    Conformance(ConformanceStatement),
    Noise,
}

impl Markers {
    /// Classify `message`, checking markers in priority order: start, end,
    /// conformance tag.
    #[must_use]
    pub fn classify(&self, message: &str) -> Classification {
        if message.contains(&self.run_start) {
            return Classification::RunStart;
        }
        if message.contains(&self.run_end) {
            return Classification::RunEnd;
        }
        match self.requirement_id(message) {
            Some(requirement) => {
                Classification::Conformance(ConformanceStatement::new(message, requirement))
            }
            None => Classification::Noise,
        }
    }

    /// The requirement identifier inside the first complete bracketed tag, if
    /// any. `"[MQTT-3.1.0-1] text"` yields `MQTT-3.1.0-1`.
    fn requirement_id(&self, message: &str) -> Option<String> {
        if self.conformance_tag.is_empty() {
            return None;
        }
        let open = message.find(&self.conformance_tag)?;
        let tag_start = open + self.conformance_tag.len();
        let close = message[tag_start..].find(']')? + tag_start;
        let inner = message[open..close].trim_start_matches('[');
        (!inner.is_empty()).then(|| inner.to_owned())
    }
}

/// A normalized conformance message.
///
/// Identity is the message text without its trailing line terminator, so
/// `"x"` and `"x\n"` are the same statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConformanceStatement {
    text: String,
    requirement: String,
}

impl ConformanceStatement {
    #[must_use]
    pub fn new(message: &str, requirement: impl Into<String>) -> Self {
        Self {
            text: strip_terminator(message).to_owned(),
            requirement: requirement.into(),
        }
    }

    /// Dedup identity.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Requirement identifier, e.g. `MQTT-3.1.1-1`.
    #[must_use]
    pub fn requirement(&self) -> &str {
        &self.requirement
    }

    /// Well-formed transcript line (always `\n`-terminated).
    #[must_use]
    pub fn transcript_line(&self) -> String {
        terminated(&self.text)
    }
}

/// Strip one trailing `\n` or `\r\n`.
#[must_use]
pub fn strip_terminator(message: &str) -> &str {
    message
        .strip_suffix('\n')
        .map_or(message, |rest| rest.strip_suffix('\r').unwrap_or(rest))
}

/// Append a line terminator unless one is already present.
#[must_use]
pub fn terminated(message: &str) -> String {
    if message.ends_with('\n') {
        message.to_owned()
    } else {
        format!("{message}\n")
    }
}

/// Session-wide set of statement identities seen so far.
///
/// Grows monotonically for the lifetime of a session. Written only by the
/// orchestrator context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConformanceLedger {
    seen: BTreeSet<String>,
}

impl ConformanceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, statement: &ConformanceStatement) -> bool {
        self.seen.contains(statement.text())
    }

    /// Record `statement`; returns `false` if it was already present.
    pub fn insert(&mut self, statement: &ConformanceStatement) -> bool {
        self.seen.insert(statement.text().to_owned())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }
}

/// Window state of one generation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// No start marker seen yet in this pass; everything is discarded.
    AwaitingStart,
    Open,
    /// End marker seen. A later start marker reopens the window.
    Closed,
}

/// What the consumer should do after feeding one harness message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractEvent {
    /// The window just opened; keep draining.
    WindowOpened,
    /// A start marker inside an open window: the current step's drain is done.
    StepBoundary,
    /// The end marker: the window is closed.
    WindowClosed,
    /// Previously unseen evidence to append to the transcript.
    Evidence(ConformanceStatement),
    /// Repeated evidence, noise, or anything outside the window.
    Discarded,
}

/// Per-pass windowing state machine over harness messages.
#[derive(Debug, Clone)]
pub struct ConformanceExtractor {
    markers: Markers,
    window: WindowState,
    discarded: u64,
}

impl ConformanceExtractor {
    #[must_use]
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            window: WindowState::AwaitingStart,
            discarded: 0,
        }
    }

    #[must_use]
    pub fn window(&self) -> WindowState {
        self.window
    }

    #[must_use]
    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Messages discarded since the last [`Self::reset`].
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Start a new pass.
    pub fn reset(&mut self) {
        self.window = WindowState::AwaitingStart;
        self.discarded = 0;
    }

    /// Feed one harness message. `is_known` reports whether a statement was
    /// already discovered (in this session or earlier in this pass).
    pub fn feed(
        &mut self,
        message: &str,
        is_known: impl Fn(&ConformanceStatement) -> bool,
    ) -> ExtractEvent {
        match self.markers.classify(message) {
            Classification::RunStart => {
                if self.window == WindowState::Open {
                    ExtractEvent::StepBoundary
                } else {
                    self.window = WindowState::Open;
                    trace!("capture window opened");
                    ExtractEvent::WindowOpened
                }
            }
            Classification::RunEnd => {
                if self.window == WindowState::Open {
                    self.window = WindowState::Closed;
                    trace!("capture window closed");
                    ExtractEvent::WindowClosed
                } else {
                    self.discard()
                }
            }
            Classification::Conformance(statement) if self.window == WindowState::Open => {
                if is_known(&statement) {
                    debug!(statement = statement.text(), "conformance statement already covered");
                    self.discard()
                } else {
                    debug!(
                        requirement = statement.requirement(),
                        statement = statement.text(),
                        "new conformance statement"
                    );
                    ExtractEvent::Evidence(statement)
                }
            }
            Classification::Conformance(_) | Classification::Noise => self.discard(),
        }
    }

    fn discard(&mut self) -> ExtractEvent {
        self.discarded = self.discarded.saturating_add(1);
        ExtractEvent::Discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brackets() -> Markers {
        Markers {
            run_start: "[start]".to_owned(),
            run_end: "[end]".to_owned(),
            conformance_tag: "[MQTT-".to_owned(),
        }
    }

    #[test]
    fn classify_recognizes_markers_before_tags() {
        let markers = Markers::default();
        assert_eq!(
            markers.classify("Waiting for request [MQTT-1.0-1]"),
            Classification::RunStart
        );
        assert_eq!(
            markers.classify("Finishing communications"),
            Classification::RunEnd
        );
        assert_eq!(markers.classify("in: CONNECT"), Classification::Noise);
    }

    #[test]
    fn classify_extracts_requirement_id() {
        let markers = Markers::default();
        let Classification::Conformance(statement) =
            markers.classify("[MQTT-3.1.1-1] client id must be present\n")
        else {
            panic!("expected a conformance statement");
        };
        assert_eq!(statement.requirement(), "MQTT-3.1.1-1");
        assert_eq!(statement.text(), "[MQTT-3.1.1-1] client id must be present");
        assert_eq!(
            statement.transcript_line(),
            "[MQTT-3.1.1-1] client id must be present\n"
        );
    }

    #[test]
    fn unclosed_or_empty_tag_is_noise() {
        let markers = Markers::default();
        assert_eq!(markers.classify("[MQTT-3.1.1-1 no close"), Classification::Noise);
        let empty = Markers {
            conformance_tag: String::new(),
            ..Markers::default()
        };
        assert_eq!(empty.classify("[MQTT-1] x"), Classification::Noise);
    }

    #[test]
    fn terminator_does_not_change_identity() {
        let a = ConformanceStatement::new("[MQTT-1] x", "MQTT-1");
        let b = ConformanceStatement::new("[MQTT-1] x\n", "MQTT-1");
        let c = ConformanceStatement::new("[MQTT-1] x\r\n", "MQTT-1");
        assert_eq!(a, b);
        assert_eq!(a, c);
        let mut ledger = ConformanceLedger::new();
        assert!(ledger.insert(&a));
        assert!(!ledger.insert(&b));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn evidence_outside_window_is_discarded() {
        let mut extractor = ConformanceExtractor::new(brackets());
        assert_eq!(
            extractor.feed("[MQTT-X] early", |_| false),
            ExtractEvent::Discarded
        );
        assert_eq!(extractor.feed("[start]", |_| false), ExtractEvent::WindowOpened);
        assert!(matches!(
            extractor.feed("[MQTT-X] inside", |_| false),
            ExtractEvent::Evidence(_)
        ));
        assert_eq!(extractor.feed("[end]", |_| false), ExtractEvent::WindowClosed);
        assert_eq!(
            extractor.feed("[MQTT-X] late", |_| false),
            ExtractEvent::Discarded
        );
        assert_eq!(extractor.discarded(), 2);
    }

    #[test]
    fn start_inside_open_window_is_step_boundary() {
        let mut extractor = ConformanceExtractor::new(brackets());
        assert_eq!(extractor.feed("[start]", |_| false), ExtractEvent::WindowOpened);
        assert_eq!(extractor.feed("[start]", |_| false), ExtractEvent::StepBoundary);
        assert_eq!(extractor.window(), WindowState::Open);
        assert_eq!(extractor.feed("[end]", |_| false), ExtractEvent::WindowClosed);
        assert_eq!(extractor.feed("[start]", |_| false), ExtractEvent::WindowOpened);
        extractor.reset();
        assert_eq!(extractor.window(), WindowState::AwaitingStart);
    }

    #[test]
    fn known_statements_are_not_forwarded() {
        let mut extractor = ConformanceExtractor::new(brackets());
        extractor.feed("[start]", |_| false);
        assert_eq!(
            extractor.feed("[MQTT-X] seen", |s| s.text() == "[MQTT-X] seen"),
            ExtractEvent::Discarded
        );
    }
}
