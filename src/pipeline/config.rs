use crate::error::IoError;
use crate::records::Numbering;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for phase behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Policy for failures that don't classify themselves; `None` keeps the
    /// policy already set on the context
    pub error_policy: Option<ErrorPolicy>,
    /// Whether embedded row numbers are adopted on load
    pub numbering: Numbering,
    /// Keep failure detail (cause chains) on ledger events
    pub verbose: bool,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        PhaseConfig {
            error_policy: None,
            numbering: Numbering::Preserve,
            verbose: false,
        }
    }
}

impl PhaseConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, IoError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}

/// How unclassified step failures are recorded, and whether the phase halts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record an error and keep processing other rows
    #[default]
    Collect,
    /// Record a warning and keep the row
    Warn,
    /// Record a dropped row and evict it
    DropRow,
    /// Record an error and abort the phase
    StopNow,
}

impl ErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPolicy::Collect => "collect",
            ErrorPolicy::Warn => "warn",
            ErrorPolicy::DropRow => "drop_row",
            ErrorPolicy::StopNow => "stop_now",
        }
    }
}

impl std::fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "collect" => Ok(ErrorPolicy::Collect),
            "warn" => Ok(ErrorPolicy::Warn),
            "drop_row" => Ok(ErrorPolicy::DropRow),
            "stop_now" => Ok(ErrorPolicy::StopNow),
            _ => Err(format!(
                "Unknown error policy: {} (expected collect, warn, drop_row or stop_now)",
                s
            )),
        }
    }
}
