//! Human-in-the-loop prompts
//!
//! Blocking by nature: the run cannot continue until the operator answers.

use crate::error::Result;
use std::io::{BufRead, Write};
use tracing::info;

/// Someone who can confirm what the software cannot verify
pub trait Operator: Send + Sync {
    /// Ask a yes/no question
    fn confirm(&self, prompt: &str) -> Result<bool>;

    /// Show an instruction and wait until the operator says it is done
    fn wait_for(&self, instruction: &str) -> Result<()>;
}

/// Prompts on stdout, answers from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOperator;

impl ConsoleOperator {
    fn read_line(&self) -> Result<String> {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

impl Operator for ConsoleOperator {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        print!("{} (y/n): ", prompt);
        std::io::stdout().flush()?;
        let answer = self.read_line()?.to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    fn wait_for(&self, instruction: &str) -> Result<()> {
        print!("{} Press Enter when done... ", instruction);
        std::io::stdout().flush()?;
        self.read_line()?;
        Ok(())
    }
}

/// Answers yes to everything (unattended runs)
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl Operator for AutoApprove {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        info!(prompt, "Auto-approved");
        Ok(true)
    }

    fn wait_for(&self, instruction: &str) -> Result<()> {
        info!(instruction, "Auto-acknowledged");
        Ok(())
    }
}
