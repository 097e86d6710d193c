//! Pre-run invariants
//!
//! **Purpose:** Refuse to start a run on a session whose gain structure would
//! defeat the loop.
//!
//! **Checks:**
//! 1. Gain-stage baseline: the master fader sits at unity. It is post-chain, so
//!    any boost lands after the limiter. If the fader cannot be read, the
//!    operator must confirm it by eye; declining is fatal.
//! 2. Device order: the chain's devices appear in the expected relative order
//!    (other devices may sit in between). Optional devices may be absent.

use crate::chain::ChainDevice;
use crate::error::{Error, Result};
use crate::operator::Operator;
use crate::registry::MatchMode;
use flaas_osc::LiveControl;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Skip every check
    pub skip: bool,
    /// Native fader value at 0 dB
    pub baseline_volume: f64,
    /// Accepted fader deviation in dB
    pub tolerance_db: f64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            skip: false,
            baseline_volume: 0.85,
            tolerance_db: 0.5,
        }
    }
}

/// Outcome of the fader check
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineCheck {
    Verified { fader_db: f64 },
    OutOfRange { fader_db: f64 },
    /// Fader could not be read; needs a human
    Unverifiable { reason: String },
}

/// Outcome of the order check
#[derive(Debug, Clone, PartialEq)]
pub struct OrderCheck {
    pub in_order: bool,
    pub actual: Vec<String>,
    /// Required devices not found at all
    pub missing: Vec<String>,
}

/// Approximate fader dB from the native 0..1 value (0.85 is unity)
pub fn fader_db(volume: f64, baseline: f64) -> f64 {
    if (volume - baseline).abs() < 0.01 {
        0.0
    } else {
        (volume - baseline) * 50.0
    }
}

/// Read the fader and classify it
pub async fn verify_baseline(live: &dyn LiveControl, track: i32, config: &PreflightConfig) -> BaselineCheck {
    match live.track_volume(track).await {
        Ok(volume) => {
            let db = fader_db(volume, config.baseline_volume);
            if db.abs() < config.tolerance_db {
                BaselineCheck::Verified { fader_db: db }
            } else {
                BaselineCheck::OutOfRange { fader_db: db }
            }
        }
        Err(e) => BaselineCheck::Unverifiable {
            reason: e.to_string(),
        },
    }
}

/// Check relative order of `expected` within `actual`
pub fn verify_device_order(actual: &[String], expected: &[ChainDevice]) -> OrderCheck {
    let mut positions = Vec::new();
    let mut missing = Vec::new();

    for device in expected {
        match actual
            .iter()
            .position(|name| MatchMode::Substring.matches(name, &device.name))
        {
            Some(index) => positions.push(index),
            None if device.optional => {}
            None => missing.push(device.name.clone()),
        }
    }

    OrderCheck {
        in_order: missing.is_empty() && positions.windows(2).all(|w| w[0] < w[1]),
        actual: actual.to_vec(),
        missing,
    }
}

/// Run every check, escalating to the operator where needed.
///
/// Any failed check is fatal ([`Error::PreconditionFailed`]).
pub async fn run_preflight(
    live: &dyn LiveControl,
    track: i32,
    device_names: &[String],
    expected: &[ChainDevice],
    config: &PreflightConfig,
    operator: &dyn Operator,
) -> Result<()> {
    if config.skip {
        warn!("Pre-flight checks skipped by configuration");
        return Ok(());
    }

    match verify_baseline(live, track, config).await {
        BaselineCheck::Verified { fader_db } => {
            info!(fader_db, "Master fader at unity");
        }
        BaselineCheck::OutOfRange { fader_db } => {
            return Err(Error::PreconditionFailed {
                check: "gain-stage baseline".to_string(),
                detail: format!(
                    "master fader at {:.2} dB, must be 0.0 dB (it is post-chain and defeats the limiter)",
                    fader_db
                ),
            });
        }
        BaselineCheck::Unverifiable { reason } => {
            warn!(reason = %reason, "Cannot read master fader, asking operator");
            if !operator.confirm("Cannot read the master fader. Is it at 0.0 dB?")? {
                return Err(Error::PreconditionFailed {
                    check: "gain-stage baseline".to_string(),
                    detail: "operator did not confirm the master fader is at 0.0 dB".to_string(),
                });
            }
            info!("Operator confirmed master fader at unity");
        }
    }

    let order = verify_device_order(device_names, expected);
    let wanted: Vec<&str> = expected.iter().map(|d| d.name.as_str()).collect();
    if !order.in_order {
        return Err(Error::PreconditionFailed {
            check: "device order".to_string(),
            detail: format!(
                "expected {} (relative order), found {}{}",
                wanted.join(" -> "),
                order.actual.join(" -> "),
                if order.missing.is_empty() {
                    String::new()
                } else {
                    format!("; missing {}", order.missing.join(", "))
                }
            ),
        });
    }
    info!(chain = %wanted.join(" -> "), "Device order verified");
    Ok(())
}
