//! Scripted collaborators for the convergence loop

use super::fake_live::FakeLive;
use async_trait::async_trait;
use flaas_master::error::{Error, Result};
use flaas_master::{LoudnessMeasurement, Meter, Operator, Renderer};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub fn measurement(lufs: f64, true_peak: f64) -> LoudnessMeasurement {
    LoudnessMeasurement {
        integrated_lufs: lufs,
        sample_peak_dbfs: true_peak - 0.3,
        true_peak_dbtp: true_peak,
        duration_s: 30.0,
        sample_rate: 44100,
        channel_count: 2,
    }
}

/// Returns measurements in order, repeating the last one when exhausted
pub struct ScriptedMeter {
    queue: Mutex<VecDeque<LoudnessMeasurement>>,
    last: Mutex<Option<LoudnessMeasurement>>,
}

impl ScriptedMeter {
    pub fn new(points: &[(f64, f64)]) -> Self {
        Self {
            queue: Mutex::new(points.iter().map(|&(l, tp)| measurement(l, tp)).collect()),
            last: Mutex::new(None),
        }
    }
}

impl Meter for ScriptedMeter {
    fn measure(&self, _path: &Path) -> Result<LoudnessMeasurement> {
        let next = self.queue.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(m) = next {
            *last = Some(m);
        }
        (*last).ok_or_else(|| Error::Meter("script is empty".into()))
    }
}

/// Synthetic stock-chain plant computed from the fake session's current values.
///
/// Loudness rises monotonically with compression, makeup, drive and limiter
/// gain. True peak tracks loudness and, unless the limiter is bypassed, is
/// held 0.2 dB over the limiter ceiling.
pub struct PlantMeter {
    live: Arc<FakeLive>,
    limiter_holds_ceiling: bool,
}

impl PlantMeter {
    pub fn new(live: Arc<FakeLive>) -> Self {
        Self {
            live,
            limiter_holds_ceiling: true,
        }
    }

    /// Peaks follow loudness with no ceiling
    pub fn hot(live: Arc<FakeLive>) -> Self {
        Self {
            live,
            limiter_holds_ceiling: false,
        }
    }

    pub fn loudness(&self) -> f64 {
        let threshold = self.live.value("Glue Compressor", "Threshold");
        let makeup = self.live.value("Glue Compressor", "Makeup");
        let drive = self.live.value("Saturator", "Drive");
        let gain = self.live.value("Limiter", "Gain");
        -30.0 + 0.2 * -threshold + 0.4 * makeup + 0.2 * drive + 0.6 * gain
    }
}

impl Meter for PlantMeter {
    fn measure(&self, _path: &Path) -> Result<LoudnessMeasurement> {
        let lufs = self.loudness();
        let mut true_peak = lufs + 8.0;
        if self.limiter_holds_ceiling {
            true_peak = true_peak.min(self.live.value("Limiter", "Ceiling") + 0.2);
        }
        Ok(measurement(lufs, true_peak))
    }
}

/// Writes a small file at the requested path, like a finished export
#[derive(Default)]
pub struct FileRenderer {
    renders: AtomicU32,
    paths: Mutex<Vec<PathBuf>>,
}

impl FileRenderer {
    pub fn count(&self) -> u32 {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for FileRenderer {
    async fn render(&self, path: &Path) -> Result<()> {
        let n = self.renders.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("RIFF render {}", n))?;
        self.paths.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Export that never finishes
pub struct TimeoutRenderer;

#[async_trait]
impl Renderer for TimeoutRenderer {
    async fn render(&self, path: &Path) -> Result<()> {
        Err(Error::RenderTimeout {
            path: path.to_path_buf(),
            waited_s: 600,
        })
    }
}

/// Gives a fixed answer and records every prompt
pub struct ScriptedOperator {
    answer: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Operator for ScriptedOperator {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer)
    }

    fn wait_for(&self, instruction: &str) -> Result<()> {
        self.prompts.lock().unwrap().push(instruction.to_string());
        Ok(())
    }
}
