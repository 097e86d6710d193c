//! Loudness targets and pass/fail checks

use crate::analysis::LoudnessMeasurement;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Loudness and peak envelope a master must land in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetProfile {
    pub target_loudness_lufs: f64,
    pub true_peak_ceiling_dbtp: f64,
    pub sample_peak_ceiling_dbfs: f64,
    /// Accepted distance from the loudness target (LU)
    pub tolerance_lu: f64,
}

impl Default for TargetProfile {
    fn default() -> Self {
        MasterMode::StreamingSafe.profile()
    }
}

/// Named target presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterMode {
    /// -14 LUFS, -1 dBTP
    StreamingSafe,
    /// -9 LUFS, -1 dBTP
    LoudPreview,
    /// -10 LUFS, -2 dBTP
    Headroom,
}

impl MasterMode {
    pub fn profile(self) -> TargetProfile {
        let (lufs, tp) = match self {
            MasterMode::StreamingSafe => (-14.0, -1.0),
            MasterMode::LoudPreview => (-9.0, -1.0),
            MasterMode::Headroom => (-10.0, -2.0),
        };
        TargetProfile {
            target_loudness_lufs: lufs,
            true_peak_ceiling_dbtp: tp,
            sample_peak_ceiling_dbfs: 0.0,
            tolerance_lu: 0.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MasterMode::StreamingSafe => "streaming_safe",
            MasterMode::LoudPreview => "loud_preview",
            MasterMode::Headroom => "headroom",
        }
    }
}

impl FromStr for MasterMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "streaming_safe" => Ok(MasterMode::StreamingSafe),
            "loud_preview" => Ok(MasterMode::LoudPreview),
            "headroom" => Ok(MasterMode::Headroom),
            other => Err(Error::InvalidConfig(format!(
                "unknown mode '{}' (expected streaming_safe, loud_preview or headroom)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for MasterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of checking one file against a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub file: String,
    pub pass_loudness: bool,
    pub pass_true_peak: bool,
    pub pass_sample_peak: bool,
    pub measurement: LoudnessMeasurement,
    pub profile: TargetProfile,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.pass_loudness && self.pass_true_peak && self.pass_sample_peak
    }
}

/// Compare a measurement against a profile
pub fn check(file: &str, measurement: LoudnessMeasurement, profile: TargetProfile) -> CheckResult {
    CheckResult {
        file: file.to_string(),
        pass_loudness: (measurement.integrated_lufs - profile.target_loudness_lufs).abs()
            <= profile.tolerance_lu,
        pass_true_peak: measurement.true_peak_dbtp <= profile.true_peak_ceiling_dbtp,
        pass_sample_peak: measurement.sample_peak_dbfs <= profile.sample_peak_ceiling_dbfs,
        measurement,
        profile,
    }
}
