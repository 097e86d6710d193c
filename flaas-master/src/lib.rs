//! # flaas mastering library (flaas-master)
//!
//! Automated loudness mastering of an Ableton Live session.
//!
//! **Purpose:** Measure a rendered mix (BS.1770 integrated loudness, sample
//! and true peak), then drive the master chain's devices over OSC until the
//! render lands on a loudness target without crossing its peak ceilings.
//!
//! **Architecture:** analyzer (symphonia + ebur128) -> planner (pure) ->
//! controller (apply, render, measure, decide) with an append-only JSONL
//! ledger of every iteration. The DAW, the exporter, the meter and the human
//! operator sit behind traits so the loop runs against fakes in tests.

pub mod analysis;
pub mod audio_io;
pub mod chain;
pub mod config;
pub mod controller;
pub mod error;
pub mod ledger;
pub mod operator;
pub mod planner;
pub mod preflight;
pub mod registry;
pub mod render;
pub mod report;
pub mod target;
pub mod trim;
pub mod write_check;

pub use analysis::{analyze, LoudnessMeasurement};
pub use audio_io::{analyze_file, FileMeter, Meter};
pub use chain::{ChainPreset, ChainProfile, ControlRole, ControlSpec};
pub use config::MasterConfig;
pub use controller::{Collaborators, Controller, RunOutcome, RunSettings, StopReason, MASTER_TRACK_ID};
pub use error::{Error, Result};
pub use ledger::{IterationRecord, Ledger};
pub use operator::{AutoApprove, ConsoleOperator, Operator};
pub use render::{renderer_for, Renderer};
pub use report::{CliFormatter, FinalSummary};
pub use target::{check, CheckResult, MasterMode, TargetProfile};
pub use trim::{TrimOutcome, Trimmer};
pub use write_check::{verify_write_path, WriteCheck};
