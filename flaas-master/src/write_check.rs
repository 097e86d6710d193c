//! Write-path self-test for a single device
//!
//! Picks one harmless continuous parameter (a mix, rate or level control,
//! never a switch), nudges it by 2% of its range, reads it back, then
//! restores the original value and reads that back too. A plugin that
//! ignores remote writes fails here instead of silently stalling a run.

use crate::error::{Error, Result};
use crate::registry::{normalize_name, ParameterDescriptor};
use flaas_osc::{DeviceRef, LiveControl};
use serde::Serialize;
use tracing::{debug, info};

/// Name fragments worth touching, in preference order
const PREFERRED: &[&str] = &["wetdry", "wet", "dry", "mix", "depth", "rate", "feedback", "gain", "level"];

/// Name fragments never touched
const AVOIDED: &[&str] = &["deviceon", "bypass", "enable", "mode", "program", "preset"];

/// Normalized step applied by the test
const NUDGE: f64 = 0.02;

/// Readback must land this close to what was written
const READBACK_TOLERANCE: f64 = 0.001;

/// Result of a successful write-path test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteCheck {
    pub device: DeviceRef,
    pub parameter: ParameterDescriptor,
    pub before: f64,
    pub after: f64,
    pub reverted: f64,
}

/// First parameter matching the preference list that is safe to nudge
pub fn pick_safe_parameter(descriptors: &[ParameterDescriptor]) -> Option<&ParameterDescriptor> {
    let usable = |d: &&ParameterDescriptor| {
        let name = normalize_name(&d.display_name);
        !d.is_quantized
            && d.max_value - d.min_value >= 0.1
            && name != "on"
            && !AVOIDED.iter().any(|a| name.contains(a))
    };
    PREFERRED.iter().find_map(|wanted| {
        descriptors
            .iter()
            .filter(usable)
            .find(|d| normalize_name(&d.display_name).contains(wanted))
    })
}

async fn read(live: &dyn LiveControl, device: DeviceRef, index: usize) -> Result<f64> {
    Ok(live.parameter_value(device, index).await?.value)
}

/// Nudge, verify, revert and verify one parameter of `device`
pub async fn verify_write_path(
    live: &dyn LiveControl,
    device: DeviceRef,
    descriptors: &[ParameterDescriptor],
) -> Result<WriteCheck> {
    let parameter = pick_safe_parameter(descriptors).cloned().ok_or_else(|| Error::ParameterNotFound {
        device: device.to_string(),
        parameter: "any continuous mix/rate/level parameter".to_string(),
        available: descriptors.iter().map(|d| d.display_name.clone()).collect(),
    })?;
    let index = parameter.index;

    let before = read(live, device, index).await?;
    let target = if before + NUDGE <= 1.0 { before + NUDGE } else { before - NUDGE };
    debug!(parameter = %parameter.display_name, before, target, "Nudging parameter");

    live.set_parameter_value(device, index, target).await?;
    let after = read(live, device, index).await?;
    if (after - target).abs() > READBACK_TOLERANCE {
        return Err(Error::PreconditionFailed {
            check: "write path".to_string(),
            detail: format!(
                "{} did not change: wrote {:.6}, read back {:.6}",
                parameter.display_name, target, after
            ),
        });
    }

    live.set_parameter_value(device, index, before).await?;
    let reverted = read(live, device, index).await?;
    if (reverted - before).abs() > READBACK_TOLERANCE {
        return Err(Error::PreconditionFailed {
            check: "write path".to_string(),
            detail: format!(
                "{} did not revert: expected {:.6}, read back {:.6}",
                parameter.display_name, before, reverted
            ),
        });
    }

    info!(parameter = %parameter.display_name, before, after, reverted, "Write path verified");
    Ok(WriteCheck {
        device,
        parameter,
        before,
        after,
        reverted,
    })
}
