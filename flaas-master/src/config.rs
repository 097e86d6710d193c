//! Configuration for the `flaas` binary
//!
//! One TOML file, every section optional:
//!
//! ```toml
//! mode = "loud_preview"
//! preset = "stock"
//!
//! [osc]
//! host = "127.0.0.1"
//! send_port = 11000
//!
//! [controller]
//! max_iterations = 10
//!
//! [target]              # replaces the mode's profile
//! target_loudness_lufs = -11.0
//! true_peak_ceiling_dbtp = -1.0
//! ```
//!
//! A `[chain]` table replaces the built-in preset entirely. CLI flags
//! override file values after loading.

use crate::chain::{ChainPreset, ChainProfile};
use crate::controller::{ControllerConfig, OutputConfig, RunSettings};
use crate::error::{Error, Result};
use crate::planner::PlannerConfig;
use crate::preflight::PreflightConfig;
use crate::registry::MatchPolicy;
use crate::render::RenderConfig;
use crate::target::{MasterMode, TargetProfile};
use crate::trim::TrimConfig;
use flaas_common::config::{load_or_default, resolve_config_path, ConfigSource, CONFIG_ENV_VAR};
use flaas_osc::OscConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub mode: MasterMode,
    pub preset: ChainPreset,
    pub osc: OscConfig,
    pub output: OutputConfig,
    pub target: Option<TargetProfile>,
    pub controller: ControllerConfig,
    pub planner: PlannerConfig,
    pub render: RenderConfig,
    pub preflight: PreflightConfig,
    pub trim: TrimConfig,
    pub matching: MatchPolicy,
    pub chain: Option<ChainProfile>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            mode: MasterMode::StreamingSafe,
            preset: ChainPreset::Stock,
            osc: OscConfig::default(),
            output: OutputConfig::default(),
            target: None,
            controller: ControllerConfig::default(),
            planner: PlannerConfig::default(),
            render: RenderConfig::default(),
            preflight: PreflightConfig::default(),
            trim: TrimConfig::default(),
            matching: MatchPolicy::default(),
            chain: None,
        }
    }
}

impl MasterConfig {
    /// Resolve and load the config file (CLI path, then `FLAAS_CONFIG`, then
    /// the per-user file, then defaults).
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let source = resolve_config_path(cli_path, CONFIG_ENV_VAR);
        let config: MasterConfig = load_or_default(&source)?;
        Ok((config, source))
    }

    /// Active target: the `[target]` override, else the mode's preset
    pub fn profile(&self) -> TargetProfile {
        self.target.unwrap_or_else(|| self.mode.profile())
    }

    /// Active chain: the `[chain]` table, else the preset
    pub fn chain(&self) -> ChainProfile {
        match &self.chain {
            Some(chain) => chain.clone(),
            None => ChainProfile::preset(self.preset, self.mode, &self.profile()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.controller.validate()?;
        if self.planner.scale_factor <= 0.0 || self.planner.clamp <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "planner scale_factor and clamp must be > 0, got {} and {}",
                self.planner.scale_factor, self.planner.clamp
            )));
        }
        if self.planner.medium_gap_lu > self.planner.large_gap_lu {
            return Err(Error::InvalidConfig(format!(
                "planner medium_gap_lu ({}) exceeds large_gap_lu ({})",
                self.planner.medium_gap_lu, self.planner.large_gap_lu
            )));
        }
        let profile = self.profile();
        if profile.tolerance_lu < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "tolerance_lu must be >= 0, got {}",
                profile.tolerance_lu
            )));
        }
        if self.matching.strategies.is_empty() {
            return Err(Error::InvalidConfig("matching.strategies is empty".to_string()));
        }
        self.chain().validate()
    }

    /// Settings for one convergence run
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            chain: self.chain(),
            profile: self.profile(),
            controller: self.controller.clone(),
            planner: self.planner,
            preflight: self.preflight.clone(),
            output: self.output.clone(),
            match_policy: self.matching.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MatchMode;
    use crate::render::RenderMethod;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = MasterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.profile().target_loudness_lufs, -14.0);
        assert_eq!(config.chain().name, "stock");
    }

    #[test]
    fn test_parse_partial_file() {
        let text = r#"
mode = "loud_preview"
preset = "premium"

[osc]
send_port = 12000

[controller]
max_iterations = 8

[render]
method = "manual"
timeout_s = 120

[matching]
strategies = ["exact"]
"#;
        let config: MasterConfig = toml::from_str(text).unwrap();
        assert_eq!(config.mode, MasterMode::LoudPreview);
        assert_eq!(config.osc.send_port, 12000);
        assert_eq!(config.osc.reply_port, 11001);
        assert_eq!(config.controller.max_iterations, 8);
        assert_eq!(config.controller.diminishing_threshold_lu, 0.2);
        assert_eq!(config.render.method, RenderMethod::Manual);
        assert_eq!(config.render.poll_interval_ms, 2000);
        assert_eq!(config.matching.strategies, vec![MatchMode::Exact]);
        assert!(config.chain().name.starts_with("premium"));
    }

    #[test]
    fn test_target_override_wins_over_mode() {
        let text = r#"
mode = "headroom"

[target]
target_loudness_lufs = -11.0
"#;
        let config: MasterConfig = toml::from_str(text).unwrap();
        let profile = config.profile();
        assert_eq!(profile.target_loudness_lufs, -11.0);
        // unspecified fields come from the default profile, not the mode
        assert_eq!(profile.true_peak_ceiling_dbtp, -1.0);
    }

    #[test]
    fn test_invalid_budget_rejected() {
        let config: MasterConfig = toml::from_str("[controller]\nmax_iterations = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env_var() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nstem = \"song\"").unwrap();
        std::env::set_var(CONFIG_ENV_VAR, file.path());

        let (config, source) = MasterConfig::load(None).unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert!(matches!(source, ConfigSource::Environment(_)));
        assert_eq!(config.output.stem, "song");
    }
}
