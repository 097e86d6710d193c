//! Mastering chain description
//!
//! **Purpose:** A chain is data: which devices are expected on the master
//! track, in what order, and which of their parameters the loop drives.
//! Each driven parameter is a [`ControlSpec`] carrying its starting value,
//! hard safe range and the step it takes in each kind of adjustment.
//!
//! **Roles:**
//! - [`ControlRole::Upstream`]: compression/saturation ahead of the limiter.
//!   Adjusted on diminishing returns.
//! - [`ControlRole::FinalStage`]: the limiter. The only controls touched when a
//!   peak ceiling is violated, and always required.
//!
//! Two presets ship built in (`stock`, `premium`); a `[chain]` table in the
//! configuration file replaces them entirely.

use crate::error::{Error, Result};
use crate::planner::GapTier;
use crate::registry::EngineeringRange;
use crate::target::{MasterMode, TargetProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Where a control sits in the gain structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlRole {
    Upstream,
    FinalStage,
}

/// Hard limits a control is clamped to after every adjustment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafeRange {
    pub min: f64,
    pub max: f64,
}

impl SafeRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Signed step per gap tier, applied when the master is too quiet
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSteps {
    pub large: f64,
    pub medium: f64,
    pub small: f64,
}

impl TierSteps {
    pub fn new(large: f64, medium: f64, small: f64) -> Self {
        Self { large, medium, small }
    }

    pub fn for_tier(&self, tier: GapTier) -> f64 {
        match tier {
            GapTier::Large => self.large,
            GapTier::Medium => self.medium,
            GapTier::Small => self.small,
        }
    }
}

/// One logical control driven by the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSpec {
    /// Logical key, e.g. `glue.threshold_db`
    pub key: String,
    /// Device name as matched on the track
    pub device: String,
    /// Parameter name on the device (normalized before matching)
    pub parameter: String,
    pub role: ControlRole,
    /// Starting engineering value
    pub initial: f64,
    pub safe_range: SafeRange,
    #[serde(default)]
    pub steps: TierSteps,
    /// Step when loudness stalls below target
    #[serde(default)]
    pub diminishing_step: f64,
    /// Step when a peak ceiling is violated
    #[serde(default)]
    pub backoff_step: f64,
    /// Upstream controls may be optional; final-stage controls never are
    #[serde(default = "default_required")]
    pub required: bool,
    /// Engineering span for parameters whose native range is 0..1
    #[serde(default)]
    pub engineering_range: Option<EngineeringRange>,
}

fn default_required() -> bool {
    true
}

impl ControlSpec {
    /// Control with no steps (held at its initial value)
    pub fn fixed(key: &str, device: &str, parameter: &str, role: ControlRole, initial: f64, safe_range: SafeRange) -> Self {
        Self {
            key: key.to_string(),
            device: device.to_string(),
            parameter: parameter.to_string(),
            role,
            initial,
            safe_range,
            steps: TierSteps::default(),
            diminishing_step: 0.0,
            backoff_step: 0.0,
            required: true,
            engineering_range: None,
        }
    }

    pub fn with_steps(mut self, steps: TierSteps) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_diminishing_step(mut self, step: f64) -> Self {
        self.diminishing_step = step;
        self
    }

    pub fn with_backoff_step(mut self, step: f64) -> Self {
        self.backoff_step = step;
        self
    }

    pub fn with_engineering_range(mut self, min: f64, max: f64) -> Self {
        self.engineering_range = Some(EngineeringRange { min, max });
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn is_final_stage(&self) -> bool {
        self.role == ControlRole::FinalStage
    }

    /// Whether the control must bind for the run to start
    pub fn is_required(&self) -> bool {
        self.required || self.is_final_stage()
    }
}

/// Device expected in the chain, for the order check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDevice {
    pub name: String,
    #[serde(default)]
    pub optional: bool,
}

impl ChainDevice {
    pub fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            optional: false,
        }
    }

    pub fn optional(name: &str) -> Self {
        Self {
            name: name.to_string(),
            optional: true,
        }
    }
}

/// Built-in chain presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPreset {
    /// Glue Compressor, Saturator, Limiter
    Stock,
    /// Utility, EQ Eight, C6, F6, SSL, Saturator, L3
    Premium,
}

impl FromStr for ChainPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stock" => Ok(ChainPreset::Stock),
            "premium" => Ok(ChainPreset::Premium),
            other => Err(Error::InvalidConfig(format!(
                "unknown chain preset '{}' (expected stock or premium)",
                other
            ))),
        }
    }
}

/// Complete chain description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainProfile {
    pub name: String,
    /// Devices in expected order
    pub devices: Vec<ChainDevice>,
    pub controls: Vec<ControlSpec>,
}

impl ChainProfile {
    pub fn preset(preset: ChainPreset, mode: MasterMode, profile: &TargetProfile) -> Self {
        match preset {
            ChainPreset::Stock => Self::stock(profile),
            ChainPreset::Premium => Self::premium(mode, profile),
        }
    }

    /// Ableton stock devices: Glue Compressor, optional Saturator, Limiter
    pub fn stock(profile: &TargetProfile) -> Self {
        use ControlRole::*;

        let controls = vec![
            ControlSpec::fixed("glue.threshold_db", "Glue Compressor", "Threshold", Upstream, -20.0, SafeRange::new(-40.0, 0.0))
                .with_steps(TierSteps::new(-4.0, -2.5, -1.5))
                .with_diminishing_step(-2.0),
            ControlSpec::fixed("glue.makeup_db", "Glue Compressor", "Makeup", Upstream, 6.0, SafeRange::new(0.0, 20.0))
                .with_steps(TierSteps::new(2.0, 1.5, 1.0))
                .with_diminishing_step(2.0),
            ControlSpec::fixed("glue.ratio", "Glue Compressor", "Ratio", Upstream, 1.0, SafeRange::new(0.0, 2.0))
                .optional(),
            ControlSpec::fixed("saturator.drive_db", "Saturator", "Drive", Upstream, 2.0, SafeRange::new(0.0, 12.0))
                .with_steps(TierSteps::new(1.0, 0.5, 0.0))
                .with_diminishing_step(1.0)
                .optional(),
            ControlSpec::fixed("limiter.gain_db", "Limiter", "Gain", FinalStage, 6.0, SafeRange::new(0.0, 24.0))
                .with_steps(TierSteps::new(3.0, 2.0, 1.0))
                .with_backoff_step(-2.0),
            ControlSpec::fixed(
                "limiter.ceiling_db",
                "Limiter",
                "Ceiling",
                FinalStage,
                profile.true_peak_ceiling_dbtp - 0.3,
                SafeRange::new(-20.0, 0.0),
            ),
        ];

        Self {
            name: "stock".to_string(),
            devices: vec![
                ChainDevice::required("Glue Compressor"),
                ChainDevice::optional("Saturator"),
                ChainDevice::required("Limiter"),
            ],
            controls,
        }
    }

    /// Waves chain: C6 multiband, SSL glue, Saturator, L3 maximizer
    pub fn premium(mode: MasterMode, profile: &TargetProfile) -> Self {
        use ControlRole::*;

        // (c6 low, c6 mid, c6 high, ssl threshold, ssl makeup, ssl ratio, drive, l3 threshold)
        let start = match mode {
            MasterMode::LoudPreview => (-20.0, -15.0, -10.0, -18.0, 15.0, 4.0, 5.0, -8.0),
            MasterMode::StreamingSafe => (-25.0, -20.0, -15.0, -25.0, 10.0, 3.0, 3.0, -12.0),
            MasterMode::Headroom => (-30.0, -25.0, -20.0, -30.0, 8.0, 2.5, 2.0, -15.0),
        };
        let band = SafeRange::new(-60.0, -5.0);

        let controls = vec![
            ControlSpec::fixed("c6.band1_threshold_db", "C6", "Band 1 Threshold", Upstream, start.0, band)
                .with_engineering_range(-60.0, 0.0)
                .with_diminishing_step(-2.0),
            ControlSpec::fixed("c6.band3_threshold_db", "C6", "Band 3 Threshold", Upstream, start.1, band)
                .with_engineering_range(-60.0, 0.0)
                .with_diminishing_step(-2.0),
            ControlSpec::fixed("c6.band5_threshold_db", "C6", "Band 5 Threshold", Upstream, start.2, band)
                .with_engineering_range(-60.0, 0.0)
                .optional(),
            ControlSpec::fixed("ssl.threshold_db", "SSL", "Thresh", Upstream, start.3, band)
                .with_engineering_range(-60.0, 0.0)
                .with_diminishing_step(-2.0),
            ControlSpec::fixed("ssl.makeup_db", "SSL", "Makeup", Upstream, start.4, SafeRange::new(0.0, 20.0))
                .with_engineering_range(-20.0, 20.0)
                .with_steps(TierSteps::new(2.0, 1.0, 0.5))
                .with_diminishing_step(2.0),
            ControlSpec::fixed("ssl.ratio", "SSL", "Ratio", Upstream, start.5, SafeRange::new(2.0, 10.0))
                .with_engineering_range(2.0, 10.0),
            ControlSpec::fixed("saturator.drive_db", "Saturator", "Drive", Upstream, start.6, SafeRange::new(0.0, 20.0))
                .with_steps(TierSteps::new(1.0, 0.5, 0.0))
                .with_diminishing_step(1.0)
                .optional(),
            ControlSpec::fixed("l3.threshold_db", "L3", "Threshold", FinalStage, start.7, SafeRange::new(-30.0, 0.0))
                .with_engineering_range(-30.0, 0.0)
                .with_steps(TierSteps::new(-3.0, -2.0, -1.0))
                .with_backoff_step(2.0),
            ControlSpec::fixed(
                "l3.ceiling_db",
                "L3",
                "Out Ceiling",
                FinalStage,
                profile.true_peak_ceiling_dbtp,
                SafeRange::new(-20.0, 0.0),
            )
            .with_engineering_range(-20.0, 0.0),
        ];

        Self {
            name: format!("premium ({})", mode),
            devices: vec![
                ChainDevice::required("Utility"),
                ChainDevice::required("EQ Eight"),
                ChainDevice::required("C6"),
                ChainDevice::required("F6"),
                ChainDevice::required("SSL"),
                ChainDevice::optional("Saturator"),
                ChainDevice::required("L3"),
            ],
            controls,
        }
    }

    /// Reject chains the loop cannot run safely
    pub fn validate(&self) -> Result<()> {
        let mut keys = HashSet::new();
        for control in &self.controls {
            if !keys.insert(control.key.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate control key '{}'",
                    control.key
                )));
            }
            if control.safe_range.min > control.safe_range.max {
                return Err(Error::InvalidConfig(format!(
                    "control '{}' has safe range {}..{}",
                    control.key, control.safe_range.min, control.safe_range.max
                )));
            }
            if !control.initial.is_finite() {
                return Err(Error::InvalidConfig(format!(
                    "control '{}' has a non-finite initial value",
                    control.key
                )));
            }
        }
        if !self.controls.iter().any(ControlSpec::is_final_stage) {
            return Err(Error::InvalidConfig(format!(
                "chain '{}' has no final-stage control",
                self.name
            )));
        }
        Ok(())
    }

    pub fn control(&self, key: &str) -> Option<&ControlSpec> {
        self.controls.iter().find(|c| c.key == key)
    }
}
