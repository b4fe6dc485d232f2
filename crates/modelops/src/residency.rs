//! Cross-check of what the inference runtime actually holds in memory.
//!
//! Bookkeeping `load()` success and real residency can diverge (restarted
//! runtime, lazy-load short circuit), so initialization asks the runtime's
//! side channel for a snapshot and verifies pinned models against it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;

use crate::{ModelError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResidentModel {
    pub name: String,
    pub size_mb: f64,
}

#[async_trait]
pub trait ResidencyProbe: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<ResidentModel>>;
}

pub const DEFAULT_RESIDENCY_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a status command (e.g. `ollama ps`) and parses its table.
#[derive(Clone, Debug)]
pub struct CommandResidencyProbe {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandResidencyProbe {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, timeout: DEFAULT_RESIDENCY_TIMEOUT }
    }

    /// Split a shell-ish command line on whitespace. No quoting support.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// The command is killed if it runs longer than this.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ResidencyProbe for CommandResidencyProbe {
    async fn snapshot(&self) -> Result<Vec<ResidentModel>> {
        let run = Command::new(&self.program).args(&self.args).kill_on_drop(true).output();
        let out = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                ModelError::Residency(format!("{} did not finish within {:?}", self.program, self.timeout))
            })?
            .map_err(|e| ModelError::Residency(format!("failed to run {}: {e}", self.program)))?;

        if !out.status.success() {
            return Err(ModelError::Residency(format!(
                "{} exited with {}: {}",
                self.program,
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }

        Ok(parse_status_table(&String::from_utf8_lossy(&out.stdout)))
    }
}

/// Parse `NAME  ID  SIZE  PROCESSOR  UNTIL` rows. Rows without a readable size are skipped.
pub fn parse_status_table(text: &str) -> Vec<ResidentModel> {
    let mut out = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("NAME") {
            continue;
        }

        let cols: Vec<&str> = line.split_whitespace().collect();
        // name, id, size value, size unit
        if cols.len() < 4 {
            continue;
        }
        let Some(size_mb) = parse_size_mb(cols[2], cols[3]) else { continue };

        out.push(ResidentModel {
            name: cols[0].to_string(),
            size_mb,
        });
    }
    out
}

pub fn parse_size_mb(value: &str, unit: &str) -> Option<f64> {
    let v: f64 = value.parse().ok()?;
    let factor = match unit.to_ascii_uppercase().as_str() {
        "B" => 1.0 / (1024.0 * 1024.0),
        "KB" | "KIB" => 1.0 / 1024.0,
        "MB" | "MIB" => 1.0,
        "GB" | "GIB" => 1024.0,
        "TB" | "TIB" => 1024.0 * 1024.0,
        _ => return None,
    };
    Some(v * factor)
}

fn matches_identifier(resident: &str, identifier: &str) -> bool {
    resident == identifier || resident.strip_suffix(":latest") == Some(identifier)
}

/// Every pinned identifier must appear in the snapshot with at least `min_mb` resident.
pub fn validate_residency(
    pinned_identifiers: &[&str],
    snapshot: &[ResidentModel],
    min_mb: f64,
) -> std::result::Result<(), String> {
    for id in pinned_identifiers {
        let Some(entry) = snapshot.iter().find(|m| matches_identifier(&m.name, id)) else {
            return Err(format!("pinned model {id} not resident"));
        };
        if entry.size_mb < min_mb {
            return Err(format!(
                "pinned model {id} reports {:.0} MB, below {:.0} MB minimum",
                entry.size_mb, min_mb
            ));
        }
    }
    Ok(())
}
