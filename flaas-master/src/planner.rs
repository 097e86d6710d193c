//! Corrective step planning
//!
//! **Purpose:** Pure functions that turn a measurement into a bounded
//! correction, a distance to target, a constraint verdict and a gap tier.
//! Nothing here touches the DAW.

use crate::analysis::LoudnessMeasurement;
use crate::target::TargetProfile;
use serde::{Deserialize, Serialize};

/// Planner tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Loudness error divided by this gives the raw delta
    pub scale_factor: f64,
    /// Symmetric bound on any planned delta
    pub clamp: f64,
    /// Gaps above this are large (LU)
    pub large_gap_lu: f64,
    /// Gaps above this are medium (LU)
    pub medium_gap_lu: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            scale_factor: 12.0,
            clamp: 6.0,
            large_gap_lu: 3.0,
            medium_gap_lu: 1.0,
        }
    }
}

/// Bounded correction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannedDelta {
    pub delta: f64,
    pub raw_delta: f64,
    pub clamped: bool,
}

/// Size class of the loudness gap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapTier {
    Large,
    Medium,
    Small,
}

/// Distance and constraint verdict for one measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub distance: f64,
    pub constraint_ok: bool,
    /// Worst ceiling excess in dB (0 when safe)
    pub violation_db: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Bounded delta toward `target`.
    ///
    /// A non-finite measurement plans the full clamp toward the target.
    pub fn plan_delta(&self, measured: f64, target: f64, clamp: f64) -> PlannedDelta {
        let clamp = clamp.abs();
        if !measured.is_finite() {
            let toward = if measured < target { clamp } else { -clamp };
            return PlannedDelta {
                delta: toward,
                raw_delta: if measured < target { f64::INFINITY } else { f64::NEG_INFINITY },
                clamped: true,
            };
        }

        let raw_delta = (target - measured) / self.config.scale_factor;
        PlannedDelta {
            delta: raw_delta.clamp(-clamp, clamp),
            raw_delta,
            clamped: raw_delta.abs() > clamp,
        }
    }

    /// Classify an absolute gap
    pub fn tier(&self, gap: f64) -> GapTier {
        let gap = gap.abs();
        if gap > self.config.large_gap_lu {
            GapTier::Large
        } else if gap > self.config.medium_gap_lu {
            GapTier::Medium
        } else {
            GapTier::Small
        }
    }
}

/// `|measured - target|`; infinite for non-finite loudness
pub fn distance_to_target(measured: f64, target: f64) -> f64 {
    if measured.is_finite() {
        (measured - target).abs()
    } else {
        f64::INFINITY
    }
}

/// True peak and sample peak both at or under their ceilings
pub fn constraint_ok(measurement: &LoudnessMeasurement, profile: &TargetProfile) -> bool {
    measurement.true_peak_dbtp <= profile.true_peak_ceiling_dbtp
        && measurement.sample_peak_dbfs <= profile.sample_peak_ceiling_dbfs
}

/// Distance, constraint verdict and violation size together
pub fn evaluate(measurement: &LoudnessMeasurement, profile: &TargetProfile) -> Evaluation {
    let tp_excess = measurement.true_peak_dbtp - profile.true_peak_ceiling_dbtp;
    let sp_excess = measurement.sample_peak_dbfs - profile.sample_peak_ceiling_dbfs;
    Evaluation {
        distance: distance_to_target(measurement.integrated_lufs, profile.target_loudness_lufs),
        constraint_ok: constraint_ok(measurement, profile),
        violation_db: tp_excess.max(sp_excess).max(0.0),
    }
}
