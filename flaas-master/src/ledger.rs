//! Append-only iteration ledger
//!
//! One JSON object per line, one line per iteration. Each append opens the
//! file, writes a single line and closes it again, so a crash mid-run leaves
//! every completed iteration on disk.

use crate::analysis::{finite_or_null, LoudnessMeasurement};
use crate::error::{Error, Result};
use crate::planner::GapTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Logical control key to engineering value, in key order
pub type ParameterVector = BTreeMap<String, f64>;

/// What the controller decided after measuring an iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// Within tolerance and under both ceilings
    Converged,
    /// Ceiling violated; final-stage controls backed off
    Backoff,
    /// Ceiling violated and the final stage has nothing left to give
    BackoffExhausted,
    /// Louder than target; stepping controls reversed
    Overshoot { tier: GapTier },
    /// Loudness stalled below target; upstream controls pushed
    DiminishingReturns { gain_lu: f64 },
    /// Regular tiered step toward target
    Step { tier: GapTier },
    /// Every control that could help is pinned at its safe limit
    Stalled,
}

/// One control's change between iterations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub key: String,
    pub from: f64,
    pub to: f64,
}

/// Everything known about one iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub run_id: Uuid,
    /// 1-based
    pub iteration: u32,
    /// Values applied before rendering
    pub parameters: ParameterVector,
    pub measurement: LoudnessMeasurement,
    #[serde(with = "finite_or_null")]
    pub distance_to_target: f64,
    pub constraint_violated: bool,
    /// Worst ceiling excess in dB (0 when safe)
    pub violation_db: f64,
    pub decision: Decision,
    /// Changes that produce the next iteration's vector
    pub changes: Vec<ParameterChange>,
    /// Rendered file name (no directory)
    pub artifact: String,
    pub artifact_sha256: String,
    pub timestamp: DateTime<Utc>,
}

/// JSON-lines ledger file
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line
    pub fn append(&self, record: &IterationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Every record in file order; a missing ledger is empty
    pub fn read_all(&self) -> Result<Vec<IterationRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        let mut records = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| Error::LedgerCorrupt {
                path: self.path.clone(),
                line: i + 1,
                detail: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Most recent record whose artifact matches `name` (a file name or a path)
    pub fn find_by_artifact(&self, name: &str) -> Result<Option<IterationRecord>> {
        let wanted = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(name);
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .find(|r| r.artifact == wanted))
    }

    /// Like [`Ledger::find_by_artifact`], but a missing record is an error
    pub fn record_for_artifact(&self, name: &str) -> Result<IterationRecord> {
        self.find_by_artifact(name)?
            .ok_or_else(|| Error::RecordNotFound(name.to_string()))
    }
}
