//! Coverage measurements reported by the harness and their wire formats.

use std::fmt;

use serde::{Deserialize, Serialize};
use suitegen_error::{GenError, Result};

/// Raw strings returned by the harness `measure` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    /// First result string; carries the coverage percentage.
    pub primary: String,
    /// Secondary diagnostic text (e.g. uncovered requirement list).
    pub secondary: String,
}

impl Measurement {
    #[must_use]
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }

    pub fn snapshot(&self, format: CoverageWireFormat) -> Result<CoverageSnapshot> {
        format.parse(&self.primary)
    }
}

/// Coverage at one point in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    /// Statements covered, when the harness reports counts.
    pub covered: Option<u64>,
    /// Statements known, when the harness reports counts.
    pub total: Option<u64>,
    /// Integer percentage, 0..=100.
    pub percent: u8,
}

impl CoverageSnapshot {
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.percent >= 100
    }
}

impl fmt::Display for CoverageSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.covered, self.total) {
            (Some(covered), Some(total)) => write!(f, "{covered}/{total} ({}%)", self.percent),
            _ => write!(f, "{}%", self.percent),
        }
    }
}

/// Versioned format of the harness's primary coverage string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageWireFormat {
    /// Last whitespace-separated token is `NN%`. Counts are not read.
    #[default]
    TrailingPercent,
    /// `... C of T = NN%`: trailing percent plus the first `C of T` pair,
    /// which must agree with the percentage.
    CountsOfTotal,
}

impl CoverageWireFormat {
    pub fn parse(self, raw: &str) -> Result<CoverageSnapshot> {
        let percent = parse_trailing_percent(raw)?;
        match self {
            Self::TrailingPercent => Ok(CoverageSnapshot {
                covered: None,
                total: None,
                percent,
            }),
            Self::CountsOfTotal => {
                let (covered, total) = parse_counts(raw)?;
                if covered > total {
                    return Err(GenError::coverage_format(
                        raw,
                        format!("covered count {covered} exceeds total {total}"),
                    ));
                }
                Ok(CoverageSnapshot {
                    covered: Some(covered),
                    total: Some(total),
                    percent,
                })
            }
        }
    }
}

fn parse_trailing_percent(raw: &str) -> Result<u8> {
    let token = raw
        .split_whitespace()
        .next_back()
        .ok_or_else(|| GenError::coverage_format(raw, "empty measurement"))?;
    let digits = token
        .strip_suffix('%')
        .ok_or_else(|| GenError::coverage_format(raw, "last token is not a percentage"))?;
    let percent: u8 = digits
        .parse()
        .map_err(|err| GenError::coverage_format(raw, format!("bad percentage '{digits}': {err}")))?;
    if percent > 100 {
        return Err(GenError::coverage_format(
            raw,
            format!("percentage {percent} out of range"),
        ));
    }
    Ok(percent)
}

fn parse_counts(raw: &str) -> Result<(u64, u64)> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    tokens
        .windows(3)
        .find_map(|window| match window {
            [covered, "of", total] => Some((covered.parse().ok()?, total.parse().ok()?)),
            _ => None,
        })
        .ok_or_else(|| GenError::coverage_format(raw, "no '<covered> of <total>' pair"))
}

/// Integer percentage, rounded down.
#[must_use]
pub fn percent_of(covered: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let scaled = u128::from(covered.min(total)) * 100 / u128::from(total);
    u8::try_from(scaled).unwrap_or(100)
}
