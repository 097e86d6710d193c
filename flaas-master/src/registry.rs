//! Device and parameter resolution
//!
//! **Purpose:** Turn the chain's logical names (device "Glue Compressor",
//! control `glue.threshold_db`) into concrete device positions and parameter
//! descriptors, and map engineering values onto the normalized `[0, 1]` values
//! exchanged over OSC.
//!
//! **Caching:** device lists are cached per track and parameter tables per
//! device for the lifetime of the registry (one run).
//!
//! **Outcomes:** resolving a control yields a [`Resolution`]: resolved,
//! skipped with a warning (optional control), or fatal (required control).

use crate::error::{Error, Result};
use flaas_osc::{DeviceRef, LiveControl, ParameterTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Unit suffixes tried off the end of logical parameter names
const UNIT_SUFFIXES: &[&str] = &["_db", "_ms", "_hz", "_pct", "_dbtp", "_lufs"];

/// Range and stepping of one device parameter, in native units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub index: usize,
    pub display_name: String,
    pub min_value: f64,
    pub max_value: f64,
    pub is_quantized: bool,
}

impl ParameterDescriptor {
    /// Build a descriptor; a swapped range is put back in order.
    pub fn new(index: usize, display_name: impl Into<String>, min: f64, max: f64, is_quantized: bool) -> Self {
        let (min_value, max_value) = if min <= max { (min, max) } else { (max, min) };
        Self {
            index,
            display_name: display_name.into(),
            min_value,
            max_value,
            is_quantized,
        }
    }

    fn snap(&self, value: f64) -> f64 {
        if self.is_quantized {
            value.round()
        } else {
            value
        }
    }
}

/// Map a native value onto `[0, 1]`.
///
/// Out-of-range values clamp. A degenerate range normalizes to `0.0`.
/// Quantized parameters snap to the nearest integer step first.
pub fn to_normalized(value: f64, descriptor: &ParameterDescriptor) -> f64 {
    let span = descriptor.max_value - descriptor.min_value;
    if span <= 0.0 {
        return 0.0;
    }
    let v = descriptor
        .snap(value.clamp(descriptor.min_value, descriptor.max_value))
        .clamp(descriptor.min_value, descriptor.max_value);
    (v - descriptor.min_value) / span
}

/// Map `[0, 1]` back onto the native range (clamped, snapped if quantized).
pub fn to_engineering(normalized: f64, descriptor: &ParameterDescriptor) -> f64 {
    let n = normalized.clamp(0.0, 1.0);
    let v = descriptor.min_value + n * (descriptor.max_value - descriptor.min_value);
    descriptor
        .snap(v)
        .clamp(descriptor.min_value, descriptor.max_value)
}

/// Engineering-unit span for a parameter whose native range is abstract (0..1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineeringRange {
    pub min: f64,
    pub max: f64,
}

impl EngineeringRange {
    fn normalize(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span == 0.0 {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }

    fn denormalize(&self, normalized: f64) -> f64 {
        self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min)
    }
}

/// Single name-matching strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Exact,
    CaseInsensitive,
    Substring,
}

impl MatchMode {
    /// Whether `candidate` satisfies this strategy for `wanted`
    pub fn matches(self, candidate: &str, wanted: &str) -> bool {
        match self {
            MatchMode::Exact => candidate == wanted,
            MatchMode::CaseInsensitive => candidate.trim().eq_ignore_ascii_case(wanted.trim()),
            MatchMode::Substring => candidate
                .to_lowercase()
                .contains(&wanted.trim().to_lowercase()),
        }
    }
}

/// Ordered list of strategies; the first strategy with any hit wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub strategies: Vec<MatchMode>,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            strategies: vec![MatchMode::Exact, MatchMode::CaseInsensitive, MatchMode::Substring],
        }
    }
}

impl MatchPolicy {
    pub fn exact_only() -> Self {
        Self {
            strategies: vec![MatchMode::Exact],
        }
    }

    /// Index of the first name matched by the first strategy that hits
    pub fn find(&self, names: &[String], wanted: &str) -> Option<usize> {
        self.strategies
            .iter()
            .find_map(|mode| names.iter().position(|n| mode.matches(n, wanted)))
    }
}

/// Lowercase and drop everything that is not alphanumeric
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Normalized forms a logical parameter name may take on the device
pub fn name_candidates(logical: &str) -> Vec<String> {
    let lower = logical.to_lowercase();
    let mut candidates = vec![normalize_name(&lower)];
    for suffix in UNIT_SUFFIXES {
        if let Some(stem) = lower.strip_suffix(suffix) {
            let stem = normalize_name(stem);
            if !stem.is_empty() && !candidates.contains(&stem) {
                candidates.push(stem);
            }
        }
    }
    candidates
}

/// Index of the descriptor whose normalized name equals a candidate
pub fn find_parameter(descriptors: &[ParameterDescriptor], logical: &str) -> Option<usize> {
    let normalized: Vec<String> = descriptors
        .iter()
        .map(|d| normalize_name(&d.display_name))
        .collect();
    name_candidates(logical)
        .iter()
        .find_map(|c| normalized.iter().position(|n| n == c))
}

/// A logical control bound to a concrete device parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlBinding {
    pub key: String,
    pub device: DeviceRef,
    pub device_name: String,
    pub descriptor: ParameterDescriptor,
    pub engineering_range: Option<EngineeringRange>,
}

impl ControlBinding {
    /// Engineering value to the normalized `[0, 1]` value sent over OSC
    pub fn to_wire(&self, value: f64) -> f64 {
        match self.engineering_range {
            Some(range) => range.normalize(value),
            None => to_normalized(value, &self.descriptor),
        }
    }

    /// Normalized value read over OSC back to engineering units
    pub fn from_wire(&self, wire: f64) -> f64 {
        match self.engineering_range {
            Some(range) => range.denormalize(wire),
            None => to_engineering(wire, &self.descriptor),
        }
    }
}

/// Result of resolving one control
#[derive(Debug)]
pub enum Resolution {
    Resolved(ControlBinding),
    /// Optional control that could not be bound
    Skipped { key: String, reason: String },
    /// Required control that could not be bound
    Fatal(Error),
}

/// What a control asks the registry to bind
#[derive(Debug, Clone, Copy)]
pub struct ControlRequest<'a> {
    pub key: &'a str,
    pub track: i32,
    pub device_name: &'a str,
    pub parameter: &'a str,
    pub required: bool,
    pub engineering_range: Option<EngineeringRange>,
}

/// Per-run cache of device lists and parameter descriptors
pub struct ParameterRegistry {
    policy: MatchPolicy,
    devices: HashMap<i32, Vec<String>>,
    descriptors: HashMap<DeviceRef, Vec<ParameterDescriptor>>,
}

impl ParameterRegistry {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            policy,
            devices: HashMap::new(),
            descriptors: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Device names on a track (cached)
    pub async fn device_names(&mut self, live: &dyn LiveControl, track: i32) -> Result<Vec<String>> {
        if let Some(names) = self.devices.get(&track) {
            return Ok(names.clone());
        }
        let list = live.device_names(track).await?;
        debug!(track, devices = ?list.names, "Read device list");
        self.devices.insert(track, list.names.clone());
        Ok(list.names)
    }

    /// Position of the device matching `name` on `track`
    pub async fn resolve_device_by_name(
        &mut self,
        live: &dyn LiveControl,
        track: i32,
        name: &str,
    ) -> Result<DeviceRef> {
        let names = self.device_names(live, track).await?;
        match self.policy.find(&names, name) {
            Some(index) => {
                debug!(track, wanted = name, found = %names[index], index, "Resolved device");
                Ok(DeviceRef::new(track, index as i32))
            }
            None => Err(Error::DeviceNotFound {
                name: name.to_string(),
                track,
                available: names,
            }),
        }
    }

    /// Every parameter descriptor of a device (cached)
    pub async fn descriptors(
        &mut self,
        live: &dyn LiveControl,
        device: DeviceRef,
    ) -> Result<Vec<ParameterDescriptor>> {
        if let Some(cached) = self.descriptors.get(&device) {
            return Ok(cached.clone());
        }
        let table = live.parameter_table(device).await?;
        let descriptors = descriptors_from_table(&table);
        self.descriptors.insert(device, descriptors.clone());
        Ok(descriptors)
    }

    /// Descriptor for one parameter index
    pub async fn resolve_range(
        &mut self,
        live: &dyn LiveControl,
        device: DeviceRef,
        parameter_index: usize,
    ) -> Result<ParameterDescriptor> {
        let descriptors = self.descriptors(live, device).await?;
        let count = descriptors.len();
        descriptors
            .into_iter()
            .nth(parameter_index)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "parameter index {} out of range ({} has {} parameters)",
                    parameter_index, device, count
                ))
            })
    }

    /// Bind one logical control to a device parameter
    pub async fn resolve_control(&mut self, live: &dyn LiveControl, request: ControlRequest<'_>) -> Resolution {
        let outcome = self.try_resolve_control(live, request).await;
        match outcome {
            Ok(binding) => {
                info!(
                    key = request.key,
                    device = %binding.device_name,
                    parameter = %binding.descriptor.display_name,
                    index = binding.descriptor.index,
                    "Bound control"
                );
                Resolution::Resolved(binding)
            }
            // Transport failures are never downgraded to a skip
            Err(e @ Error::Osc(_)) => Resolution::Fatal(e),
            Err(e) if request.required => Resolution::Fatal(e),
            Err(e) => {
                warn!(key = request.key, error = %e, "Skipping optional control");
                Resolution::Skipped {
                    key: request.key.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_resolve_control(
        &mut self,
        live: &dyn LiveControl,
        request: ControlRequest<'_>,
    ) -> Result<ControlBinding> {
        let device = self
            .resolve_device_by_name(live, request.track, request.device_name)
            .await?;
        let names = self.device_names(live, request.track).await?;
        let device_name = names
            .get(device.device as usize)
            .cloned()
            .unwrap_or_else(|| request.device_name.to_string());

        let descriptors = self.descriptors(live, device).await?;
        let index = find_parameter(&descriptors, request.parameter).ok_or_else(|| {
            Error::ParameterNotFound {
                device: device_name.clone(),
                parameter: request.parameter.to_string(),
                available: descriptors.iter().map(|d| d.display_name.clone()).collect(),
            }
        })?;

        Ok(ControlBinding {
            key: request.key.to_string(),
            device,
            device_name,
            descriptor: descriptors[index].clone(),
            engineering_range: request.engineering_range,
        })
    }
}

/// Descriptors from a parameter table; short metadata columns default to 0..1
pub fn descriptors_from_table(table: &ParameterTable) -> Vec<ParameterDescriptor> {
    table
        .names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            ParameterDescriptor::new(
                i,
                name.clone(),
                table.mins.get(i).copied().unwrap_or(0.0),
                table.maxs.get(i).copied().unwrap_or(1.0),
                table.quantized.get(i).copied().unwrap_or(false),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain() -> ParameterDescriptor {
        ParameterDescriptor::new(1, "Gain", -35.0, 35.0, false)
    }

    #[test]
    fn test_round_trip_on_range() {
        let d = gain();
        for x in [-35.0, -12.5, 0.0, 3.25, 35.0] {
            let back = to_engineering(to_normalized(x, &d), &d);
            assert!((back - x).abs() < 1e-9, "{} -> {}", x, back);
        }
    }

    #[test]
    fn test_out_of_range_clamps() {
        let d = gain();
        assert_eq!(to_normalized(-100.0, &d), 0.0);
        assert_eq!(to_normalized(100.0, &d), 1.0);
        assert_eq!(to_engineering(1.7, &d), 35.0);
        assert_eq!(to_engineering(-0.2, &d), -35.0);
    }

    #[test]
    fn test_degenerate_range_is_zero() {
        let d = ParameterDescriptor::new(0, "Fixed", 2.0, 2.0, false);
        assert_eq!(to_normalized(2.0, &d), 0.0);
        assert_eq!(to_engineering(0.6, &d), 2.0);
    }

    #[test]
    fn test_swapped_range_is_normalized() {
        let d = ParameterDescriptor::new(0, "Inverted", 10.0, -10.0, false);
        assert_eq!(d.min_value, -10.0);
        assert_eq!(d.max_value, 10.0);
    }

    #[test]
    fn test_quantized_snaps_to_steps() {
        let d = ParameterDescriptor::new(3, "Ratio", 0.0, 6.0, true);
        assert_eq!(to_engineering(0.49, &d), 3.0);
        assert_eq!(to_normalized(2.4, &d), 2.0 / 6.0);
    }

    #[test]
    fn test_engineering_range_maps_onto_unit_native() {
        let binding = ControlBinding {
            key: "l3.threshold_db".into(),
            device: DeviceRef::new(0, 6),
            device_name: "L3-16".into(),
            descriptor: ParameterDescriptor::new(2, "Threshold", 0.0, 1.0, false),
            engineering_range: Some(EngineeringRange { min: -30.0, max: 0.0 }),
        };
        assert!((binding.to_wire(-15.0) - 0.5).abs() < 1e-12);
        assert!((binding.from_wire(0.5) - (-15.0)).abs() < 1e-12);
        assert_eq!(binding.to_wire(-90.0), 0.0);
    }

    #[test]
    fn test_native_range_binding_writes_normalized() {
        let binding = ControlBinding {
            key: "glue.threshold_db".into(),
            device: DeviceRef::new(0, 0),
            device_name: "Glue Compressor".into(),
            descriptor: ParameterDescriptor::new(1, "Threshold", -40.0, 0.0, false),
            engineering_range: None,
        };
        assert!((binding.to_wire(-20.0) - 0.5).abs() < 1e-12);
        assert!((binding.from_wire(0.25) - (-30.0)).abs() < 1e-12);
        assert_eq!(binding.to_wire(6.0), 1.0);
        assert_eq!(binding.to_wire(-60.0), 0.0);
    }

    #[test]
    fn test_match_policy_priority() {
        let names: Vec<String> = ["Glue Compressor", "glue compressor", "Limiter"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let policy = MatchPolicy::default();
        assert_eq!(policy.find(&names, "glue compressor"), Some(1));
        assert_eq!(policy.find(&names, "GLUE COMPRESSOR"), Some(0));
        assert_eq!(policy.find(&names, "Limit"), Some(2));
        assert_eq!(MatchPolicy::exact_only().find(&names, "Limit"), None);
    }

    #[test]
    fn test_each_match_mode() {
        assert!(MatchMode::Exact.matches("Limiter", "Limiter"));
        assert!(!MatchMode::Exact.matches("Limiter", "limiter"));
        assert!(MatchMode::CaseInsensitive.matches("Limiter", " limiter "));
        assert!(MatchMode::Substring.matches("FabFilter Pro-L 2", "pro-l"));
    }

    #[test]
    fn test_parameter_name_normalization() {
        let descriptors = vec![
            ParameterDescriptor::new(0, "Device On", 0.0, 1.0, true),
            ParameterDescriptor::new(1, "Threshold", -40.0, 0.0, false),
            ParameterDescriptor::new(2, "Makeup", 0.0, 20.0, false),
            ParameterDescriptor::new(3, "Out Ceiling", -20.0, 0.0, false),
        ];
        assert_eq!(find_parameter(&descriptors, "threshold_db"), Some(1));
        assert_eq!(find_parameter(&descriptors, "Makeup"), Some(2));
        assert_eq!(find_parameter(&descriptors, "out_ceiling_db"), Some(3));
        assert_eq!(find_parameter(&descriptors, "release_ms"), None);
    }

    #[test]
    fn test_name_candidates_strip_one_unit_suffix() {
        assert_eq!(name_candidates("gain_db"), vec!["gaindb", "gain"]);
        assert_eq!(name_candidates("Drive"), vec!["drive"]);
    }

    #[test]
    fn test_descriptors_from_short_table() {
        let table = ParameterTable {
            device: DeviceRef::new(0, 0),
            names: vec!["A".into(), "B".into()],
            mins: vec![-1.0],
            maxs: vec![1.0],
            quantized: vec![],
        };
        let d = descriptors_from_table(&table);
        assert_eq!(d[1].min_value, 0.0);
        assert_eq!(d[1].max_value, 1.0);
        assert!(!d[0].is_quantized);
    }
}
