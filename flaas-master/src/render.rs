//! Export collaborators
//!
//! **Purpose:** Get the DAW to write the current mix to a file, then wait for
//! the file to stop changing.
//!
//! **Methods:**
//! - `applescript`: drives Live's Export dialog through System Events (macOS)
//! - `manual`: asks the operator to export
//!
//! Either way the render is only complete once the file exists and its size
//! and modification time have held still for two consecutive polls. A render
//! is never retried; a timeout is fatal to the run.

use crate::error::{Error, Result};
use crate::operator::Operator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

/// Consecutive unchanged polls that count as stable
const STABLE_POLLS: u32 = 2;

/// How renders are triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMethod {
    Applescript,
    Manual,
}

impl std::str::FromStr for RenderMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "applescript" => Ok(RenderMethod::Applescript),
            "manual" => Ok(RenderMethod::Manual),
            other => Err(Error::InvalidConfig(format!(
                "unknown render method '{}' (expected applescript or manual)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub method: RenderMethod,
    /// Limit on waiting for a stable file
    pub timeout_s: u64,
    pub poll_interval_ms: u64,
    /// Limit on the UI script itself
    pub script_timeout_s: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            method: if cfg!(target_os = "macos") {
                RenderMethod::Applescript
            } else {
                RenderMethod::Manual
            },
            timeout_s: 600,
            poll_interval_ms: 2000,
            script_timeout_s: 30,
        }
    }
}

/// Something that can render the current mix to `path`
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, path: &Path) -> Result<()>;
}

/// Build the configured renderer
pub fn renderer_for(config: &RenderConfig, operator: Arc<dyn Operator>) -> Box<dyn Renderer> {
    match config.method {
        RenderMethod::Applescript => Box::new(AppleScriptRenderer::new(config.clone())),
        RenderMethod::Manual => Box::new(ManualRenderer::new(config.clone(), operator)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    size: u64,
    modified: Option<SystemTime>,
}

fn stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some(FileStamp {
        size: meta.len(),
        modified: meta.modified().ok(),
    })
}

/// Wait until `path` exists and is unchanged for two consecutive polls.
pub async fn wait_for_stable_file(path: &Path, timeout: Duration, poll_interval: Duration) -> Result<()> {
    let started = Instant::now();
    let mut previous: Option<FileStamp> = None;
    let mut stable = 0u32;

    while started.elapsed() < timeout {
        match stamp(path) {
            Some(now) => {
                if previous == Some(now) {
                    stable += 1;
                    if stable >= STABLE_POLLS {
                        debug!(path = %path.display(), size = now.size, "File stable");
                        return Ok(());
                    }
                } else {
                    if previous.is_some() {
                        debug!(path = %path.display(), size = now.size, "File still growing");
                    }
                    stable = 0;
                }
                previous = Some(now);
            }
            None => {
                previous = None;
                stable = 0;
            }
        }
        tokio::time::sleep(poll_interval).await;
    }

    Err(Error::RenderTimeout {
        path: path.to_path_buf(),
        waited_s: timeout.as_secs(),
    })
}

fn remove_stale(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
        debug!(path = %path.display(), "Removed stale export");
    }
    Ok(())
}

/// macOS UI automation through `osascript`
#[derive(Debug, Clone)]
pub struct AppleScriptRenderer {
    config: RenderConfig,
}

impl AppleScriptRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Script that exports to `dir`/`base` (Live appends the extension itself)
    pub fn script(dir: &Path, base: &str) -> String {
        let dir = applescript_escape(&dir.display().to_string());
        let base = applescript_escape(base);
        format!(
            r#"on run
    tell application "System Events"
        set liveProcs to (processes whose bundle identifier starts with "com.ableton.live")
        if (count of liveProcs) is 0 then
            error "Ableton Live not running"
        end if
        set frontmost of (item 1 of liveProcs) to true
    end tell
    delay 0.5
    tell application "System Events"
        tell (item 1 of (processes whose bundle identifier starts with "com.ableton.live"))
            tell menu bar 1
                tell menu bar item "File"
                    tell menu 1
                        set exportItems to menu items whose name contains "Export"
                        if (count of exportItems) > 0 then
                            click item 1 of exportItems
                        else
                            keystroke "r" using {{command down, shift down}}
                        end if
                    end tell
                end tell
            end tell
        end tell
    end tell
    delay 1.5
    tell application "System Events"
        tell (item 1 of (processes whose bundle identifier starts with "com.ableton.live"))
            try
                click button "Export" of window 1
            on error
                keystroke return
            end try
            delay 1.5
            keystroke "g" using {{command down, shift down}}
            delay 0.8
            keystroke "a" using {{command down}}
            delay 0.2
            keystroke "{dir}"
            delay 0.5
            keystroke return
            delay 0.8
            keystroke "a" using {{command down}}
            delay 0.2
            keystroke "{base}"
            delay 0.3
            try
                click button "Save" of sheet 1 of window 1
            on error
                keystroke return
            end try
            delay 0.5
            try
                tell sheet 1 of window 1
                    set replaceButtons to buttons whose name contains "Replace"
                    if (count of replaceButtons) > 0 then
                        click item 1 of replaceButtons
                    end if
                end tell
            end try
        end tell
    end tell
    return "Export triggered"
end run
"#
        )
    }
}

fn applescript_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl Renderer for AppleScriptRenderer {
    async fn render(&self, path: &Path) -> Result<()> {
        // Live's save dialog needs an absolute folder
        let path: PathBuf = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let failed = |detail: String| Error::RenderFailed {
            path: path.clone(),
            detail,
        };
        let dir = path
            .parent()
            .ok_or_else(|| failed("export path has no parent directory".to_string()))?;
        let base = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| failed("export path has no file name".to_string()))?;

        remove_stale(&path)?;

        info!(path = %path.display(), "Triggering export via AppleScript");
        let script = Self::script(dir, base);
        let run = Command::new("osascript").arg("-e").arg(&script).output();
        let output = tokio::time::timeout(Duration::from_secs(self.config.script_timeout_s), run)
            .await
            .map_err(|_| {
                failed(format!(
                    "AppleScript timed out after {}s (UI hung?)",
                    self.config.script_timeout_s
                ))
            })??;

        if !output.status.success() {
            return Err(failed(format!(
                "AppleScript failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        wait_for_stable_file(
            &path,
            Duration::from_secs(self.config.timeout_s),
            Duration::from_millis(self.config.poll_interval_ms),
        )
        .await
    }
}

/// Operator performs the export by hand
pub struct ManualRenderer {
    config: RenderConfig,
    operator: Arc<dyn Operator>,
}

impl ManualRenderer {
    pub fn new(config: RenderConfig, operator: Arc<dyn Operator>) -> Self {
        Self { config, operator }
    }
}

#[async_trait]
impl Renderer for ManualRenderer {
    async fn render(&self, path: &Path) -> Result<()> {
        remove_stale(path)?;
        self.operator
            .wait_for(&format!("Export the master to {}.", path.display()))?;
        wait_for_stable_file(
            path,
            Duration::from_secs(self.config.timeout_s),
            Duration::from_millis(self.config.poll_interval_ms),
        )
        .await
    }
}
