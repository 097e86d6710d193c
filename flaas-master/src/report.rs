//! Report generation and formatting
//!
//! **Purpose:** The final summary record written next to the master, and the
//! CLI text the `flaas` binary prints.

use crate::analysis::{finite_or_null, LoudnessMeasurement};
use crate::controller::StopReason;
use crate::ledger::{Decision, IterationRecord, ParameterVector};
use crate::target::{CheckResult, TargetProfile};
use chrono::{DateTime, Utc};
use flaas_osc::{DeviceInfo, DeviceList, ParameterTable};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// Final summary of a mastering run
///
/// Written to `<stem>_summary.json` once the winning render has been copied
/// to its final path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSummary {
    pub run_id: Uuid,
    pub chain: String,
    pub profile: TargetProfile,
    pub stop_reason: StopReason,
    pub converged: bool,
    /// Iterations actually run
    pub iterations: u32,
    pub winning_iteration: u32,
    pub parameters: ParameterVector,
    pub measurement: LoudnessMeasurement,
    #[serde(with = "finite_or_null")]
    pub distance_to_target: f64,
    pub constraint_violated: bool,
    /// Iteration file the master was copied from
    pub source_artifact: String,
    pub artifact_path: String,
    pub artifact_sha256: String,
    pub ledger_path: String,
    pub skipped_controls: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl FinalSummary {
    /// Export summary to a JSON file
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Import summary from a JSON file
    pub fn read_json<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let summary: FinalSummary = serde_json::from_reader(file)?;
        Ok(summary)
    }
}

/// One row of a device parameter map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub id: usize,
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub is_quantized: bool,
}

/// Snapshot of every parameter on one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMap {
    pub track_id: i32,
    pub device_id: i32,
    pub device_name: String,
    pub device_class_name: String,
    pub num_parameters: usize,
    pub generated_at_utc: DateTime<Utc>,
    pub params: Vec<ParameterEntry>,
}

impl DeviceMap {
    /// Join the info, range table and current values of a device.
    ///
    /// Short value or metadata columns fall back to 0.0 and a 0..1 range.
    pub fn new(info: &DeviceInfo, table: &ParameterTable, values: &[f64]) -> Self {
        let params = table
            .names
            .iter()
            .enumerate()
            .map(|(id, name)| ParameterEntry {
                id,
                name: name.clone(),
                value: values.get(id).copied().unwrap_or(0.0),
                min: table.mins.get(id).copied().unwrap_or(0.0),
                max: table.maxs.get(id).copied().unwrap_or(1.0),
                is_quantized: table.quantized.get(id).copied().unwrap_or(false),
            })
            .collect();
        Self {
            track_id: info.device.track,
            device_id: info.device.device,
            device_name: info.name.clone(),
            device_class_name: info.class_name.clone(),
            num_parameters: info.num_parameters,
            generated_at_utc: flaas_common::time::now(),
            params,
        }
    }
}

fn db(value: f64) -> String {
    if value.is_finite() {
        format!("{:.2}", value)
    } else if value > 0.0 {
        "inf".to_string()
    } else {
        "-inf".to_string()
    }
}

/// CLI formatter for mastering output
pub struct CliFormatter;

impl CliFormatter {
    /// Format a banner line with a title
    pub fn format_header(title: &str) -> String {
        let rule = "═".repeat(70);
        format!("{}\n{}\n{}", rule, title, rule)
    }

    /// Format a measurement
    ///
    /// Example: `LUFS-I -9.21 | peak -1.34 dBFS | true peak -1.02 dBTP | 30.0 s @ 44100 Hz x2`
    pub fn format_measurement(m: &LoudnessMeasurement) -> String {
        format!(
            "LUFS-I {} | peak {} dBFS | true peak {} dBTP | {:.1} s @ {} Hz x{}",
            db(m.integrated_lufs),
            db(m.sample_peak_dbfs),
            db(m.true_peak_dbtp),
            m.duration_s,
            m.sample_rate,
            m.channel_count
        )
    }

    /// Format a track's device list with positions
    pub fn format_devices(list: &DeviceList) -> String {
        let mut output = format!("Track {} ({} devices)\n", list.track, list.names.len());
        for (index, name) in list.names.iter().enumerate() {
            output.push_str(&format!("  [{}] {}\n", index, name));
        }
        output
    }

    /// Format pass/fail of a check
    pub fn format_check(result: &CheckResult) -> String {
        let mark = |ok: bool| if ok { "✓" } else { "✗" };
        let mut output = String::new();
        output.push_str(&format!("{}\n", result.file));
        output.push_str(&format!(
            "  [{}] loudness   {} LUFS (target {:.1} ± {:.1})\n",
            mark(result.pass_loudness),
            db(result.measurement.integrated_lufs),
            result.profile.target_loudness_lufs,
            result.profile.tolerance_lu
        ));
        output.push_str(&format!(
            "  [{}] true peak  {} dBTP (ceiling {:.1})\n",
            mark(result.pass_true_peak),
            db(result.measurement.true_peak_dbtp),
            result.profile.true_peak_ceiling_dbtp
        ));
        output.push_str(&format!(
            "  [{}] peak       {} dBFS (ceiling {:.1})\n",
            mark(result.pass_sample_peak),
            db(result.measurement.sample_peak_dbfs),
            result.profile.sample_peak_ceiling_dbfs
        ));
        output.push_str(if result.passed() { "PASS" } else { "FAIL" });
        output
    }

    fn format_decision(decision: &Decision) -> String {
        match decision {
            Decision::Converged => "converged".to_string(),
            Decision::Backoff => "peak over ceiling, backing off limiter".to_string(),
            Decision::BackoffExhausted => "peak over ceiling, limiter already at safe limit".to_string(),
            Decision::Overshoot { tier } => format!("too loud, reversing {:?} step", tier).to_lowercase(),
            Decision::DiminishingReturns { gain_lu } => {
                format!("diminishing returns ({:+.2} LU), pushing upstream", gain_lu)
            }
            Decision::Step { tier } => format!("{:?} step toward target", tier).to_lowercase(),
            Decision::Stalled => "no control can move further, stopping".to_string(),
        }
    }

    /// Format one iteration progress line
    ///
    /// Example: `[✓] iter 2: -9.80 LUFS, -1.20 dBTP, gap 0.80 LU -> small step toward target`
    pub fn format_iteration(record: &IterationRecord) -> String {
        let symbol = if record.constraint_violated { "✗" } else { "✓" };
        let mut line = format!(
            "[{}] iter {}: {} LUFS, {} dBTP, gap {} LU -> {}",
            symbol,
            record.iteration,
            db(record.measurement.integrated_lufs),
            db(record.measurement.true_peak_dbtp),
            db(record.distance_to_target),
            Self::format_decision(&record.decision)
        );
        for change in &record.changes {
            line.push_str(&format!("\n      {} {:.2} -> {:.2}", change.key, change.from, change.to));
        }
        line
    }

    /// Format the iteration table
    pub fn format_iteration_table(records: &[IterationRecord]) -> String {
        let mut output = String::new();

        output.push_str("┌──────┬──────────┬──────────┬────────┬────────┐\n");
        output.push_str("│ Iter │ LUFS-I   │ TP dBTP  │ Gap LU │ Safe   │\n");
        output.push_str("├──────┼──────────┼──────────┼────────┼────────┤\n");
        for r in records {
            output.push_str(&format!(
                "│ {:4} │ {:>8} │ {:>8} │ {:>6} │ {:6} │\n",
                r.iteration,
                db(r.measurement.integrated_lufs),
                db(r.measurement.true_peak_dbtp),
                db(r.distance_to_target),
                if r.constraint_violated { "no" } else { "yes" }
            ));
        }
        output.push_str("└──────┴──────────┴──────────┴────────┴────────┘\n");

        output
    }

    /// Format the run summary
    pub fn format_summary(summary: &FinalSummary) -> String {
        let mut output = String::new();

        output.push_str(&Self::format_header(match summary.stop_reason {
            StopReason::HitTarget => "MASTER COMPLETE (converged)",
            StopReason::MaxIterations => "MASTER COMPLETE (best result, budget exhausted)",
            StopReason::Stalled => "MASTER COMPLETE (best result, no further progress)",
            _ => "MASTER NOT SAFE (least-violating result published)",
        }));
        output.push('\n');
        output.push_str(&format!("File: {}\n", summary.artifact_path));
        output.push_str(&format!("SHA-256: {}\n", summary.artifact_sha256));
        output.push_str(&format!(
            "From: {} (iteration {} of {})\n",
            summary.source_artifact, summary.winning_iteration, summary.iterations
        ));
        output.push_str(&format!("Chain: {}\n", summary.chain));
        output.push_str(&format!(
            "Target: {:.1} LUFS, {:.1} dBTP\n",
            summary.profile.target_loudness_lufs, summary.profile.true_peak_ceiling_dbtp
        ));
        output.push_str(&format!("Result: {}\n", Self::format_measurement(&summary.measurement)));
        output.push_str(&format!("Stop reason: {:?}\n", summary.stop_reason));
        output.push_str("\nFinal settings:\n");
        for (key, value) in &summary.parameters {
            output.push_str(&format!("  {:<24} {:>8.2}\n", key, value));
        }
        if !summary.skipped_controls.is_empty() {
            output.push_str(&format!("Skipped: {}\n", summary.skipped_controls.join(", ")));
        }
        output.push_str(&format!("Ledger: {}\n", summary.ledger_path));

        output
    }
}
