//! Loudness convergence loop
//!
//! **Purpose:** Drive a mastering chain toward a loudness target under peak
//! ceilings by repeatedly applying a parameter vector, rendering, measuring
//! and adjusting.
//!
//! **States:** `Initializing -> Iterating -> {Converged, ConstraintViolated,
//! MaxIterationsReached}`
//!
//! **Per iteration:**
//! 1. Apply the vector (absolute writes, safe to repeat)
//! 2. Render with timeout (fatal on failure, never retried)
//! 3. Measure and evaluate distance and ceilings
//! 4. Track the best constraint-safe record (ties keep the earliest)
//! 5. Decide, in priority order: converged, ceiling backoff (final stage
//!    only), overshoot reversal, diminishing returns (upstream only), tiered
//!    step toward target
//! 6. Append the record to the ledger, clamp every value to its safe range
//!
//! A run stops early when nothing can move: backoff with the final stage at
//! its limit, or a step whose every control is already pinned. The stop
//! reason is `Stalled` when a constraint-safe render exists and
//! `ConstraintUnsafe` otherwise.
//!
//! After the loop the winning render is copied to `<stem>.wav`, hashed and
//! described by `<stem>_summary.json`.

use crate::analysis::LoudnessMeasurement;
use crate::audio_io::Meter;
use crate::chain::{ChainProfile, ControlRole, ControlSpec};
use crate::error::{Error, Result};
use crate::ledger::{Decision, IterationRecord, Ledger, ParameterChange, ParameterVector};
use crate::operator::Operator;
use crate::planner::{evaluate, Evaluation, Planner, PlannerConfig};
use crate::preflight::{run_preflight, PreflightConfig};
use crate::registry::{ControlBinding, ControlRequest, MatchPolicy, ParameterRegistry, Resolution};
use crate::render::Renderer;
use crate::report::FinalSummary;
use crate::target::TargetProfile;
use flaas_osc::LiveControl;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// AbletonOSC id of the master track
pub const MASTER_TRACK_ID: i32 = -1000;

/// Loop limits and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Iteration budget (1..=100)
    pub max_iterations: u32,
    /// Loudness gain per iteration below which returns are diminishing (LU)
    pub diminishing_threshold_lu: f64,
    /// Track carrying the chain
    pub track: i32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            diminishing_threshold_lu: 0.2,
            track: MASTER_TRACK_ID,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.max_iterations) {
            return Err(Error::InvalidConfig(format!(
                "max_iterations must be 1..=100, got {}",
                self.max_iterations
            )));
        }
        if self.diminishing_threshold_lu.is_nan() || self.diminishing_threshold_lu < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "diminishing_threshold_lu must be >= 0, got {}",
                self.diminishing_threshold_lu
            )));
        }
        Ok(())
    }
}

/// Where a run writes its files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub stem: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            stem: "master".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(format!("{}.jsonl", self.stem))
    }

    pub fn artifact_path(&self, iteration: u32) -> PathBuf {
        self.dir.join(format!("{}_iter{}.wav", self.stem, iteration))
    }

    pub fn final_path(&self) -> PathBuf {
        self.dir.join(format!("{}.wav", self.stem))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(format!("{}_summary.json", self.stem))
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    None,
    HitTarget,
    MaxIterations,
    /// Stopped early with a constraint-safe winner; no control could move
    Stalled,
    ConstraintUnsafe,
}

/// Lifecycle position of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Initializing,
    Iterating { iteration: u32 },
    Converged,
    /// Ceiling violated; recoverable while backoff has room
    ConstraintViolated,
    MaxIterationsReached,
}

/// Run-scoped bookkeeping owned by the controller
#[derive(Debug, Clone, Default)]
pub struct ConvergenceState {
    /// Closest constraint-safe record
    pub best_record: Option<IterationRecord>,
    /// Smallest ceiling excess among unsafe records
    pub least_violating: Option<IterationRecord>,
    /// Loudness of the previous iteration (reset by a violation)
    pub previous_loudness: Option<f64>,
    pub stop_reason: StopReason,
}

impl ConvergenceState {
    /// Stop reason for a run that ended without converging
    pub fn unconverged_reason(&self, ran_out_of_budget: bool) -> StopReason {
        match (&self.best_record, ran_out_of_budget) {
            (None, _) => StopReason::ConstraintUnsafe,
            (Some(_), true) => StopReason::MaxIterations,
            (Some(_), false) => StopReason::Stalled,
        }
    }

    /// Fold one record into the best-so-far trackers
    pub fn observe(&mut self, record: &IterationRecord) {
        if record.constraint_violated {
            let better = self
                .least_violating
                .as_ref()
                .map_or(true, |r| record.violation_db < r.violation_db);
            if better {
                self.least_violating = Some(record.clone());
            }
        } else {
            let better = self
                .best_record
                .as_ref()
                .map_or(true, |r| record.distance_to_target < r.distance_to_target);
            if better {
                self.best_record = Some(record.clone());
            }
        }
    }

    /// Record to publish: best safe one, else the least violating
    pub fn winner(&self) -> Option<&IterationRecord> {
        self.best_record.as_ref().or(self.least_violating.as_ref())
    }
}

/// A chain control bound to its device parameter
#[derive(Debug, Clone)]
pub struct BoundControl {
    pub spec: ControlSpec,
    pub binding: ControlBinding,
}

/// Everything a run needs besides its collaborators
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub chain: ChainProfile,
    pub profile: TargetProfile,
    pub controller: ControllerConfig,
    pub planner: PlannerConfig,
    pub preflight: PreflightConfig,
    pub output: OutputConfig,
    pub match_policy: MatchPolicy,
}

/// External systems the loop talks to
pub struct Collaborators<'a> {
    pub live: &'a dyn LiveControl,
    pub renderer: &'a dyn Renderer,
    pub meter: &'a dyn Meter,
    pub operator: &'a dyn Operator,
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub stop_reason: StopReason,
    pub records: Vec<IterationRecord>,
    /// Published record
    pub winner: IterationRecord,
    pub summary: FinalSummary,
    /// Optional controls that could not be bound
    pub skipped: Vec<String>,
}

impl RunOutcome {
    pub fn converged(&self) -> bool {
        self.stop_reason == StopReason::HitTarget
    }
}

/// One step decision and the vector it produces
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub decision: Decision,
    pub next: ParameterVector,
    pub changes: Vec<ParameterChange>,
}

/// Decide the next vector from one evaluated measurement.
///
/// Pure: the controller's loop and the tests share it.
#[allow(clippy::too_many_arguments)]
pub fn decide(
    controls: &[ControlSpec],
    current: &ParameterVector,
    measurement: &LoudnessMeasurement,
    evaluation: &Evaluation,
    profile: &TargetProfile,
    previous_loudness: Option<f64>,
    planner: &Planner,
    diminishing_threshold_lu: f64,
) -> Adjustment {
    let measured = measurement.integrated_lufs;
    let target = profile.target_loudness_lufs;

    if evaluation.constraint_ok && evaluation.distance <= profile.tolerance_lu {
        return Adjustment {
            decision: Decision::Converged,
            next: current.clone(),
            changes: Vec::new(),
        };
    }

    if !evaluation.constraint_ok {
        let (next, changes) = step_controls(controls, current, |c| {
            (c.role == ControlRole::FinalStage).then_some(c.backoff_step)
        });
        let decision = if changes.is_empty() {
            Decision::BackoffExhausted
        } else {
            Decision::Backoff
        };
        return Adjustment { decision, next, changes };
    }

    if measured > target {
        let tier = planner.tier(measured - target);
        let (next, changes) = step_controls(controls, current, |c| Some(-c.steps.for_tier(tier)));
        return stepped(Decision::Overshoot { tier }, current, next, changes);
    }

    if let Some(previous) = previous_loudness {
        let gain_lu = measured - previous;
        if gain_lu < diminishing_threshold_lu {
            let (next, changes) = step_controls(controls, current, |c| {
                (c.role == ControlRole::Upstream).then_some(c.diminishing_step)
            });
            if !changes.is_empty() {
                return Adjustment {
                    decision: Decision::DiminishingReturns { gain_lu },
                    next,
                    changes,
                };
            }
            // Upstream pinned: only the final stage is left to push
            let tier = planner.tier(target - measured);
            let (next, changes) = step_controls(controls, current, |c| {
                (c.role == ControlRole::FinalStage).then_some(c.steps.for_tier(tier))
            });
            return stepped(Decision::Step { tier }, current, next, changes);
        }
    }

    let tier = planner.tier(target - measured);
    let (next, changes) = step_controls(controls, current, |c| Some(c.steps.for_tier(tier)));
    stepped(Decision::Step { tier }, current, next, changes)
}

/// Adjustment for a step, or `Stalled` when the step moved nothing
fn stepped(
    decision: Decision,
    current: &ParameterVector,
    next: ParameterVector,
    changes: Vec<ParameterChange>,
) -> Adjustment {
    if changes.is_empty() {
        return Adjustment {
            decision: Decision::Stalled,
            next: current.clone(),
            changes,
        };
    }
    Adjustment { decision, next, changes }
}

/// Apply a per-control step, clamp to safe range, report effective changes
fn step_controls<F>(controls: &[ControlSpec], current: &ParameterVector, step: F) -> (ParameterVector, Vec<ParameterChange>)
where
    F: Fn(&ControlSpec) -> Option<f64>,
{
    let mut next = current.clone();
    let mut changes = Vec::new();

    for control in controls {
        let Some(from) = current.get(&control.key).copied() else {
            continue;
        };
        let delta = step(control).unwrap_or(0.0);
        let to = control.safe_range.clamp(from + delta);
        if to != from {
            changes.push(ParameterChange {
                key: control.key.clone(),
                from,
                to,
            });
        }
        next.insert(control.key.clone(), to);
    }
    (next, changes)
}

/// Initial vector of the bound controls, clamped to safe ranges
pub fn initial_vector(controls: &[ControlSpec]) -> ParameterVector {
    controls
        .iter()
        .map(|c| (c.key.clone(), c.safe_range.clamp(c.initial)))
        .collect()
}

/// The convergence loop
pub struct Controller<'a> {
    io: Collaborators<'a>,
    settings: RunSettings,
    planner: Planner,
    registry: ParameterRegistry,
    run_id: Uuid,
    state: ControllerState,
}

impl<'a> Controller<'a> {
    pub fn new(io: Collaborators<'a>, settings: RunSettings) -> Self {
        let planner = Planner::new(settings.planner);
        let registry = ParameterRegistry::new(settings.match_policy.clone());
        Self {
            io,
            settings,
            planner,
            registry,
            run_id: Uuid::new_v4(),
            state: ControllerState::Initializing,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Resolve every control, then run the pre-flight checks
    pub async fn initialize(&mut self) -> Result<(Vec<BoundControl>, Vec<String>)> {
        self.state = ControllerState::Initializing;
        let track = self.settings.controller.track;
        let mut bound = Vec::new();
        let mut skipped = Vec::new();

        for spec in &self.settings.chain.controls {
            let request = ControlRequest {
                key: &spec.key,
                track,
                device_name: &spec.device,
                parameter: &spec.parameter,
                required: spec.is_required(),
                engineering_range: spec.engineering_range,
            };
            match self.registry.resolve_control(self.io.live, request).await {
                Resolution::Resolved(binding) => bound.push(BoundControl {
                    spec: spec.clone(),
                    binding,
                }),
                Resolution::Skipped { key, .. } => skipped.push(key),
                Resolution::Fatal(e) => return Err(e),
            }
        }

        let names = self.registry.device_names(self.io.live, track).await?;
        run_preflight(
            self.io.live,
            track,
            &names,
            &self.settings.chain.devices,
            &self.settings.preflight,
            self.io.operator,
        )
        .await?;

        info!(
            chain = %self.settings.chain.name,
            bound = bound.len(),
            skipped = skipped.len(),
            "Chain resolved"
        );
        Ok((bound, skipped))
    }

    async fn apply(&self, bound: &[BoundControl], vector: &ParameterVector) -> Result<()> {
        for control in bound {
            let Some(value) = vector.get(&control.spec.key) else {
                continue;
            };
            let wire = control.binding.to_wire(*value);
            debug!(key = %control.spec.key, value, wire, "Apply");
            self.io
                .live
                .set_parameter_value(control.binding.device, control.binding.descriptor.index, wire)
                .await?;
        }
        Ok(())
    }

    /// Run the loop to completion and publish the winning render
    pub async fn run(&mut self) -> Result<RunOutcome> {
        self.settings.controller.validate()?;
        self.settings.chain.validate()?;

        let (bound, skipped) = self.initialize().await?;
        let controls: Vec<ControlSpec> = bound.iter().map(|b| b.spec.clone()).collect();
        let profile = self.settings.profile;
        let output = self.settings.output.clone();
        let max_iterations = self.settings.controller.max_iterations;

        std::fs::create_dir_all(&output.dir)?;
        let ledger = Ledger::new(output.ledger_path());

        let mut vector = initial_vector(&controls);
        let mut convergence = ConvergenceState::default();
        let mut records = Vec::new();

        info!(
            run_id = %self.run_id,
            target_lufs = profile.target_loudness_lufs,
            tp_ceiling = profile.true_peak_ceiling_dbtp,
            max_iterations,
            "Starting convergence loop"
        );

        for iteration in 1..=max_iterations {
            self.state = ControllerState::Iterating { iteration };

            self.apply(&bound, &vector).await?;

            let artifact = output.artifact_path(iteration);
            self.io.renderer.render(&artifact).await?;

            let measurement = self.io.meter.measure(&artifact)?;
            let evaluation = evaluate(&measurement, &profile);
            let artifact_sha256 = flaas_common::hash::sha256_file(&artifact)?;

            let adjustment = decide(
                &controls,
                &vector,
                &measurement,
                &evaluation,
                &profile,
                convergence.previous_loudness,
                &self.planner,
                self.settings.controller.diminishing_threshold_lu,
            );

            let record = IterationRecord {
                run_id: self.run_id,
                iteration,
                parameters: vector.clone(),
                measurement,
                distance_to_target: evaluation.distance,
                constraint_violated: !evaluation.constraint_ok,
                violation_db: evaluation.violation_db,
                decision: adjustment.decision.clone(),
                changes: adjustment.changes.clone(),
                artifact: file_name(&artifact),
                artifact_sha256,
                timestamp: flaas_common::time::now(),
            };
            convergence.observe(&record);
            ledger.append(&record)?;
            log_iteration(&record, max_iterations);
            records.push(record);

            match adjustment.decision {
                Decision::Converged => {
                    self.state = ControllerState::Converged;
                    convergence.stop_reason = StopReason::HitTarget;
                    break;
                }
                Decision::BackoffExhausted => {
                    warn!(iteration, "Ceiling violated and final stage is at its safe limit");
                    self.state = ControllerState::ConstraintViolated;
                    convergence.stop_reason = convergence.unconverged_reason(false);
                    break;
                }
                Decision::Stalled => {
                    warn!(iteration, "No control can move further in the chosen direction");
                    self.state = ControllerState::MaxIterationsReached;
                    convergence.stop_reason = convergence.unconverged_reason(false);
                    break;
                }
                Decision::Backoff => {
                    self.state = ControllerState::ConstraintViolated;
                    convergence.previous_loudness = None;
                }
                _ => {
                    convergence.previous_loudness = Some(measurement.integrated_lufs);
                }
            }

            vector = adjustment.next;
        }

        if convergence.stop_reason == StopReason::None {
            self.state = ControllerState::MaxIterationsReached;
            convergence.stop_reason = convergence.unconverged_reason(true);
        }

        let winner = convergence
            .winner()
            .cloned()
            .ok_or_else(|| Error::InvalidConfig("run produced no iterations".to_string()))?;

        match convergence.stop_reason {
            StopReason::HitTarget => info!(iteration = winner.iteration, "Converged"),
            StopReason::MaxIterations => warn!(
                best_iteration = winner.iteration,
                distance = winner.distance_to_target,
                "Iteration budget exhausted, publishing best constraint-safe result"
            ),
            StopReason::Stalled => warn!(
                best_iteration = winner.iteration,
                distance = winner.distance_to_target,
                "Stopped early, publishing best constraint-safe result"
            ),
            _ => warn!(
                iteration = winner.iteration,
                violation_db = winner.violation_db,
                "No constraint-safe iteration, publishing least-violating result"
            ),
        }

        let summary = self.publish(&winner, convergence.stop_reason, records.len() as u32, &skipped)?;

        Ok(RunOutcome {
            run_id: self.run_id,
            stop_reason: convergence.stop_reason,
            records,
            winner,
            summary,
            skipped,
        })
    }

    /// Copy the winning render to the final path and write the summary
    fn publish(
        &self,
        winner: &IterationRecord,
        stop_reason: StopReason,
        iterations: u32,
        skipped: &[String],
    ) -> Result<FinalSummary> {
        let output = &self.settings.output;
        let source = output.dir.join(&winner.artifact);
        let final_path = output.final_path();
        std::fs::copy(&source, &final_path)?;
        let sha256 = flaas_common::hash::sha256_file(&final_path)?;

        let summary = FinalSummary {
            run_id: self.run_id,
            chain: self.settings.chain.name.clone(),
            profile: self.settings.profile,
            stop_reason,
            converged: stop_reason == StopReason::HitTarget,
            iterations,
            winning_iteration: winner.iteration,
            parameters: winner.parameters.clone(),
            measurement: winner.measurement,
            distance_to_target: winner.distance_to_target,
            constraint_violated: winner.constraint_violated,
            source_artifact: winner.artifact.clone(),
            artifact_path: final_path.display().to_string(),
            artifact_sha256: sha256,
            ledger_path: output.ledger_path().display().to_string(),
            skipped_controls: skipped.to_vec(),
            timestamp: flaas_common::time::now(),
        };
        summary.write_json(&output.summary_path())?;
        info!(path = %final_path.display(), "Published final master");
        Ok(summary)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn log_iteration(record: &IterationRecord, max_iterations: u32) {
    info!(
        iteration = record.iteration,
        of = max_iterations,
        lufs = record.measurement.integrated_lufs,
        true_peak = record.measurement.true_peak_dbtp,
        distance = record.distance_to_target,
        violated = record.constraint_violated,
        decision = ?record.decision,
        "Iteration measured"
    );
}
