//! flaas - automated loudness mastering over OSC
//!
//! **Usage:**
//! ```bash
//! flaas analyze mix.wav
//! flaas check master.wav --mode loud-preview
//! flaas devices
//! flaas verify
//! flaas write-check Chorus
//! flaas device-map Limiter --out limiter.json
//! flaas trim mix.wav --dry-run
//! flaas master --mode loud-preview --chain stock --yes
//! flaas lookup master_iter3.wav
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flaas_master::chain::ChainPreset;
use flaas_master::operator::{AutoApprove, ConsoleOperator, Operator};
use flaas_master::registry::{descriptors_from_table, ParameterRegistry};
use flaas_master::render::{renderer_for, RenderMethod};
use flaas_master::report::{CliFormatter, DeviceMap};
use flaas_master::write_check::verify_write_path;
use flaas_master::{
    analyze_file, check, Collaborators, Controller, FileMeter, Ledger, MasterConfig, MasterMode, StopReason,
    TrimOutcome, Trimmer,
};
use flaas_osc::{DeviceRef, LiveClient, LiveControl, UdpTransport};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Automated loudness mastering for Ableton Live
#[derive(Parser, Debug)]
#[command(name = "flaas")]
#[command(about = "Automated loudness mastering for Ableton Live over OSC")]
#[command(version)]
struct Cli {
    /// Config file (overrides FLAAS_CONFIG and the per-user file)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// AbletonOSC host
    #[arg(long, global = true, env = "FLAAS_OSC_HOST")]
    host: Option<String>,

    /// AbletonOSC listen port
    #[arg(long, global = true, env = "FLAAS_OSC_PORT")]
    port: Option<u16>,

    /// Track carrying the chain (-1000 is the master track)
    #[arg(long, global = true, allow_hyphen_values = true)]
    track: Option<i32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure loudness and peaks of an audio file
    Analyze {
        file: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Pass/fail a file against a target profile (exit 1 on fail)
    #[command(alias = "verify-audio")]
    Check {
        file: PathBuf,
        #[arg(long)]
        mode: Option<MasterMode>,
    },
    /// Check that AbletonOSC answers
    Ping,
    /// List devices on the track
    Devices,
    /// Dump every parameter of one device as JSON
    DeviceMap {
        /// Device index or name
        device: String,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Read back the trim gain control
    Verify,
    /// Nudge, verify and revert one harmless parameter of a device
    WriteCheck {
        /// Device index or name
        device: String,
    },
    /// One-shot gain correction toward the target
    Trim {
        file: PathBuf,
        #[arg(long)]
        mode: Option<MasterMode>,
        /// Plan only, write nothing to Live
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the convergence loop
    Master {
        #[arg(long)]
        mode: Option<MasterMode>,
        /// Chain preset (ignored when the config has a [chain] table)
        #[arg(long)]
        chain: Option<ChainPreset>,
        /// Auto-approve operator prompts
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        render: Option<RenderMethod>,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        stem: Option<String>,
        /// Skip the fader and device-order checks
        #[arg(long)]
        skip_preflight: bool,
    },
    /// Show the ledger record that produced a rendered file
    Lookup { file: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("flaas=info,flaas_master=info,flaas_osc=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let (mut config, source) = MasterConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    info!(source = ?source, "Configuration resolved");

    if let Some(host) = cli.host {
        config.osc.host = host;
    }
    if let Some(port) = cli.port {
        config.osc.send_port = port;
    }
    if let Some(track) = cli.track {
        config.controller.track = track;
        config.trim.track = track;
    }

    match cli.command {
        Command::Analyze { file, json } => {
            let measurement = analyze_file(&file).with_context(|| format!("Failed to analyze {}", file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&measurement)?);
            } else {
                println!("{}", CliFormatter::format_measurement(&measurement));
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Check { file, mode } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            let measurement = analyze_file(&file).with_context(|| format!("Failed to analyze {}", file.display()))?;
            let result = check(&file.display().to_string(), measurement, config.profile());
            println!("{}", CliFormatter::format_check(&result));
            Ok(if result.passed() { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }

        Command::Ping => {
            let live = live_client(&config);
            live.ping().await.context("AbletonOSC did not answer")?;
            println!("✓ AbletonOSC reachable at {}:{}", config.osc.host, config.osc.send_port);
            Ok(ExitCode::SUCCESS)
        }

        Command::Devices => {
            let live = live_client(&config);
            let list = live
                .device_names(config.controller.track)
                .await
                .context("Failed to read device list")?;
            print!("{}", CliFormatter::format_devices(&list));
            Ok(ExitCode::SUCCESS)
        }

        Command::DeviceMap { device, out } => {
            let live = live_client(&config);
            let device = resolve_device(&live, &config, &device).await?;
            let info = live.device_info(device).await.context("Failed to read device info")?;
            let table = live.parameter_table(device).await.context("Failed to read parameters")?;
            let values = live.parameter_values(device).await.context("Failed to read parameter values")?;
            let map = DeviceMap::new(&info, &table, &values);
            let json = serde_json::to_string_pretty(&map)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, format!("{}\n", json))
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("✓ Wrote {} parameters to {}", map.params.len(), path.display());
                }
                None => println!("{}", json),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Verify => {
            let live = live_client(&config);
            let mut trimmer = Trimmer::new(config.trim.clone(), config.matching.clone());
            let (binding, normalized) = trimmer
                .read_current(&live)
                .await
                .context("Failed to read trim gain")?;
            println!(
                "{}.{} = {:+.2} (norm={:.3})",
                binding.device_name,
                binding.descriptor.display_name,
                binding.from_wire(normalized),
                normalized
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::WriteCheck { device } => {
            let live = live_client(&config);
            let device = resolve_device(&live, &config, &device).await?;
            let table = live.parameter_table(device).await.context("Failed to read parameters")?;
            let descriptors = descriptors_from_table(&table);
            let result = verify_write_path(&live, device, &descriptors)
                .await
                .context("Write path check failed")?;
            println!(
                "✓ {} {} before={:.6} after={:.6} reverted_to={:.6}",
                result.device, result.parameter.display_name, result.before, result.after, result.reverted
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Trim { file, mode, dry_run } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            let live = live_client(&config);
            let mut trimmer = Trimmer::new(config.trim.clone(), config.matching.clone());
            let outcome = trimmer
                .run(&live, &FileMeter, &file, &config.profile(), dry_run)
                .await
                .context("Trim failed")?;
            print_trim(&outcome);
            Ok(ExitCode::SUCCESS)
        }

        Command::Master {
            mode,
            chain,
            yes,
            render,
            max_iterations,
            output_dir,
            stem,
            skip_preflight,
        } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(chain) = chain {
                config.preset = chain;
            }
            if let Some(method) = render {
                config.render.method = method;
            }
            if let Some(n) = max_iterations {
                config.controller.max_iterations = n;
            }
            if let Some(dir) = output_dir {
                config.output.dir = dir;
            }
            if let Some(stem) = stem {
                config.output.stem = stem;
            }
            if skip_preflight {
                config.preflight.skip = true;
            }
            config.validate().context("Invalid configuration")?;
            master(&config, yes).await
        }

        Command::Lookup { file } => {
            let ledger = Ledger::new(config.output.ledger_path());
            let record = ledger
                .record_for_artifact(&file)
                .with_context(|| format!("Lookup in {} failed", ledger.path().display()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn master(config: &MasterConfig, yes: bool) -> Result<ExitCode> {
    let live = live_client(config);
    let operator: Arc<dyn Operator> = if yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(ConsoleOperator)
    };
    let renderer = renderer_for(&config.render, operator.clone());
    let settings = config.run_settings();

    println!(
        "{}",
        CliFormatter::format_header(&format!(
            "MASTER: {} | target {:.1} LUFS, {:.1} dBTP | up to {} iterations",
            settings.chain.name,
            settings.profile.target_loudness_lufs,
            settings.profile.true_peak_ceiling_dbtp,
            settings.controller.max_iterations
        ))
    );

    let io = Collaborators {
        live: &live,
        renderer: renderer.as_ref(),
        meter: &FileMeter,
        operator: operator.as_ref(),
    };
    let mut controller = Controller::new(io, settings);
    let outcome = controller.run().await.context("Mastering run failed")?;

    for record in &outcome.records {
        println!("{}", CliFormatter::format_iteration(record));
    }
    println!();
    print!("{}", CliFormatter::format_iteration_table(&outcome.records));
    print!("{}", CliFormatter::format_summary(&outcome.summary));

    Ok(match outcome.stop_reason {
        StopReason::ConstraintUnsafe => ExitCode::from(1),
        _ => ExitCode::SUCCESS,
    })
}

fn live_client(config: &MasterConfig) -> LiveClient<UdpTransport> {
    LiveClient::new(UdpTransport::new(config.osc.clone()))
}

async fn resolve_device(live: &dyn LiveControl, config: &MasterConfig, device: &str) -> Result<DeviceRef> {
    let track = config.controller.track;
    if let Ok(index) = device.parse::<i32>() {
        return Ok(DeviceRef::new(track, index));
    }
    let mut registry = ParameterRegistry::new(config.matching.clone());
    Ok(registry.resolve_device_by_name(live, track, device).await?)
}

fn print_trim(outcome: &TrimOutcome) {
    match outcome {
        TrimOutcome::RefusedNearMax { normalized } => {
            println!("STOP: gain already near max (norm={:.3})", normalized);
        }
        TrimOutcome::DryRun(plan) => {
            println!("MEASURE: {}", CliFormatter::format_measurement(&plan.measurement));
            println!(
                "DRY RUN: {}.{} {:.2} -> {:.2} ({:+.2})",
                plan.binding.device_name,
                plan.binding.descriptor.display_name,
                plan.current_value,
                plan.new_value,
                plan.delta.delta
            );
        }
        TrimOutcome::Applied {
            plan,
            readback_normalized,
            readback_value,
        } => {
            println!("MEASURE: {}", CliFormatter::format_measurement(&plan.measurement));
            println!(
                "APPLIED: {}.{} {:.2} -> {:.2} (read back {:.2}, norm={:.3})",
                plan.binding.device_name,
                plan.binding.descriptor.display_name,
                plan.current_value,
                plan.new_value,
                readback_value,
                readback_normalized
            );
        }
    }
}
