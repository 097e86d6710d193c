//! One-shot gain trim
//!
//! Measures a render once and nudges a single gain control (the master
//! Utility's Gain by default) toward the loudness target. No render loop:
//! the operator re-exports and checks afterwards.
//!
//! The trim refuses to run when the control already sits near the top of its
//! range, since a further boost would only clip.

use crate::analysis::LoudnessMeasurement;
use crate::audio_io::Meter;
use crate::controller::MASTER_TRACK_ID;
use crate::error::{Error, Result};
use crate::planner::{PlannedDelta, Planner, PlannerConfig};
use crate::registry::{ControlBinding, ControlRequest, EngineeringRange, MatchPolicy, ParameterRegistry, Resolution};
use crate::target::TargetProfile;
use flaas_osc::LiveControl;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    pub track: i32,
    pub device: String,
    pub parameter: String,
    /// Refuse when the normalized value is at or above this
    pub refuse_at_normalized: f64,
    /// dB of gain per LU of loudness error (divisor)
    pub scale_factor: f64,
    pub clamp_db: f64,
    /// Engineering span when the parameter's native range is abstract
    pub engineering_range: Option<EngineeringRange>,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            track: MASTER_TRACK_ID,
            device: "Utility".to_string(),
            parameter: "Gain".to_string(),
            refuse_at_normalized: 0.99,
            scale_factor: 1.0,
            clamp_db: 6.0,
            engineering_range: None,
        }
    }
}

/// Planned change to the gain control
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrimPlan {
    pub binding: ControlBinding,
    pub measurement: LoudnessMeasurement,
    /// Normalized value read over OSC
    pub current_normalized: f64,
    pub current_value: f64,
    pub delta: PlannedDelta,
    pub new_value: f64,
    /// Normalized value to write
    pub new_normalized: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrimOutcome {
    /// Control already near max; nothing measured or written
    RefusedNearMax { normalized: f64 },
    DryRun(TrimPlan),
    Applied {
        plan: TrimPlan,
        readback_normalized: f64,
        readback_value: f64,
    },
}

/// Compute the new gain from a measurement without touching the DAW
pub fn plan_trim(
    binding: &ControlBinding,
    current_normalized: f64,
    measurement: LoudnessMeasurement,
    profile: &TargetProfile,
    planner: &Planner,
) -> TrimPlan {
    let current_value = binding.from_wire(current_normalized);
    let delta = planner.plan_delta(
        measurement.integrated_lufs,
        profile.target_loudness_lufs,
        planner.config().clamp,
    );
    let new_normalized = binding.to_wire(current_value + delta.delta);
    TrimPlan {
        binding: binding.clone(),
        measurement,
        current_normalized,
        current_value,
        delta,
        new_value: binding.from_wire(new_normalized),
        new_normalized,
    }
}

pub struct Trimmer {
    config: TrimConfig,
    planner: Planner,
    registry: ParameterRegistry,
}

impl Trimmer {
    pub fn new(config: TrimConfig, policy: MatchPolicy) -> Self {
        let planner = Planner::new(PlannerConfig {
            scale_factor: config.scale_factor,
            clamp: config.clamp_db,
            ..PlannerConfig::default()
        });
        Self {
            config,
            planner,
            registry: ParameterRegistry::new(policy),
        }
    }

    /// Bind the gain control and read its current normalized value
    pub async fn read_current(&mut self, live: &dyn LiveControl) -> Result<(ControlBinding, f64)> {
        let request = ControlRequest {
            key: "trim.gain_db",
            track: self.config.track,
            device_name: &self.config.device,
            parameter: &self.config.parameter,
            required: true,
            engineering_range: self.config.engineering_range,
        };
        let binding = match self.registry.resolve_control(live, request).await {
            Resolution::Resolved(binding) => binding,
            Resolution::Fatal(e) => return Err(e),
            Resolution::Skipped { reason, .. } => return Err(Error::InvalidConfig(reason)),
        };

        let current = live
            .parameter_value(binding.device, binding.descriptor.index)
            .await?
            .value;
        Ok((binding, current.clamp(0.0, 1.0)))
    }

    pub async fn run(
        &mut self,
        live: &dyn LiveControl,
        meter: &dyn Meter,
        file: &Path,
        profile: &TargetProfile,
        dry_run: bool,
    ) -> Result<TrimOutcome> {
        if self.config.scale_factor <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "trim scale_factor must be > 0, got {}",
                self.config.scale_factor
            )));
        }

        let (binding, normalized) = self.read_current(live).await?;
        if normalized >= self.config.refuse_at_normalized {
            warn!(normalized, "Gain already near max, refusing to trim");
            return Ok(TrimOutcome::RefusedNearMax { normalized });
        }

        let measurement = meter.measure(file)?;
        let plan = plan_trim(&binding, normalized, measurement, profile, &self.planner);
        info!(
            lufs = measurement.integrated_lufs,
            target = profile.target_loudness_lufs,
            delta = plan.delta.delta,
            from = plan.current_value,
            to = plan.new_value,
            "Planned trim"
        );

        if dry_run {
            return Ok(TrimOutcome::DryRun(plan));
        }

        live.set_parameter_value(binding.device, binding.descriptor.index, plan.new_normalized)
            .await?;
        let readback_normalized = live
            .parameter_value(binding.device, binding.descriptor.index)
            .await?
            .value;
        let readback_value = binding.from_wire(readback_normalized);
        info!(readback_normalized, readback_value, "Trim applied");

        Ok(TrimOutcome::Applied {
            plan,
            readback_normalized,
            readback_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParameterDescriptor;
    use crate::target::MasterMode;
    use flaas_osc::DeviceRef;

    fn binding() -> ControlBinding {
        ControlBinding {
            key: "trim.gain_db".into(),
            device: DeviceRef::new(MASTER_TRACK_ID, 0),
            device_name: "Utility".into(),
            descriptor: ParameterDescriptor::new(9, "Gain", -35.0, 35.0, false),
            engineering_range: None,
        }
    }

    fn measured(lufs: f64) -> LoudnessMeasurement {
        LoudnessMeasurement {
            integrated_lufs: lufs,
            sample_peak_dbfs: -6.0,
            true_peak_dbtp: -5.8,
            duration_s: 10.0,
            sample_rate: 48000,
            channel_count: 2,
        }
    }

    fn planner() -> Planner {
        Planner::new(PlannerConfig {
            scale_factor: 1.0,
            clamp: 6.0,
            ..PlannerConfig::default()
        })
    }

    #[test]
    fn test_quiet_mix_gets_boost() {
        let profile = MasterMode::StreamingSafe.profile();
        let plan = plan_trim(&binding(), 0.5, measured(-17.0), &profile, &planner());
        assert!((plan.delta.delta - 3.0).abs() < 1e-9);
        assert!((plan.new_value - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_boost_clamped() {
        let profile = MasterMode::LoudPreview.profile();
        let plan = plan_trim(&binding(), 0.5, measured(-30.0), &profile, &planner());
        assert!(plan.delta.clamped);
        assert!((plan.new_value - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_new_value_stays_in_range() {
        let profile = MasterMode::LoudPreview.profile();
        // 0.9 of -35..35 is +28 dB
        let plan = plan_trim(&binding(), 0.9, measured(-20.0), &profile, &planner());
        assert!((plan.current_value - 28.0).abs() < 1e-9);
        assert_eq!(plan.new_normalized, 1.0);
        assert_eq!(plan.new_value, 35.0);
    }

    #[test]
    fn test_write_is_normalized() {
        let profile = MasterMode::StreamingSafe.profile();
        let plan = plan_trim(&binding(), 0.5, measured(-17.0), &profile, &planner());
        // +3 dB on -35..35
        assert!((plan.new_normalized - 38.0 / 70.0).abs() < 1e-12);
    }
}
