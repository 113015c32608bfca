//! Deterministic replay of timestamped request scripts.
//!
//! A script has one request per line: `<offset_secs> <entity>`, where the
//! offset is measured from the start of the replay. Blank lines and lines
//! starting with `#` are ignored. Offsets must not decrease.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::admission::{AdmissionController, Decision};
use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::error::{FloodgateError, Result};
use crate::report::RequestLog;

/// One scripted request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStep {
    /// Line of the script the step was read from
    pub line: usize,
    /// Time since the start of the replay
    pub offset: Duration,
    /// Requesting entity
    pub entity: String,
}

/// A parsed replay script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayScript {
    steps: Vec<ReplayStep>,
}

impl ReplayScript {
    /// Load a script from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading replay script");

        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse a script from text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut steps = Vec::new();
        let mut last = Duration::ZERO;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(offset), Some(entity), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(invalid(line_no, "expected '<offset_secs> <entity>'"));
            };

            let secs: f64 = offset
                .parse()
                .map_err(|_| invalid(line_no, &format!("invalid offset '{}'", offset)))?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(invalid(line_no, &format!("invalid offset '{}'", offset)));
            }

            let offset = Duration::try_from_secs_f64(secs)
                .map_err(|_| invalid(line_no, &format!("offset '{}' out of range", offset)))?;
            if offset < last {
                return Err(invalid(line_no, "offsets must not decrease"));
            }
            last = offset;

            steps.push(ReplayStep {
                line: line_no,
                offset,
                entity: entity.to_string(),
            });
        }

        Ok(Self { steps })
    }

    /// The scripted requests in order.
    pub fn steps(&self) -> &[ReplayStep] {
        &self.steps
    }

    /// Number of scripted requests.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the script has no requests.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn invalid(line_no: usize, msg: &str) -> FloodgateError {
    FloodgateError::InvalidInput(format!("line {}: {}", line_no, msg))
}

/// Decisions produced by a replay.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// Each step paired with its decision, in script order
    pub decisions: Vec<(ReplayStep, Decision)>,
    /// Log of the decisions, timestamped from the replay's start time
    pub log: RequestLog,
}

/// Run `script` against a fresh engine driven by a manual clock.
///
/// `started_at` anchors the wall-clock timestamps written to the log; the
/// decisions themselves depend only on the script and the configuration.
pub fn replay(
    script: &ReplayScript,
    config: EngineConfig,
    log_capacity: usize,
    started_at: DateTime<Utc>,
) -> Result<ReplayOutcome> {
    let clock = Arc::new(ManualClock::new());
    let controller = AdmissionController::new(config, clock.clone())?;
    let mut log = RequestLog::new(log_capacity);
    let mut decisions = Vec::with_capacity(script.len());

    for step in script.steps() {
        let out_of_range = || invalid(step.line, "offset out of range");
        let timestamp = chrono::Duration::from_std(step.offset)
            .ok()
            .and_then(|offset| started_at.checked_add_signed(offset))
            .ok_or_else(out_of_range)?;
        clock.set_offset(step.offset).ok_or_else(out_of_range)?;

        let decision = controller.admit(&step.entity)?;
        log.record_at(timestamp, &step.entity, decision);
        decisions.push((step.clone(), decision));
    }

    info!(
        requests = decisions.len(),
        entities = controller.entity_count(),
        "Replay finished"
    );

    Ok(ReplayOutcome { decisions, log })
}
