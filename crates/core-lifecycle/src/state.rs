use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of the background service as last sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Degraded,
    #[default]
    Unknown,
}

impl BackgroundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundState::Created => "created",
            BackgroundState::Starting => "starting",
            BackgroundState::Running => "running",
            BackgroundState::Stopping => "stopping",
            BackgroundState::Stopped => "stopped",
            BackgroundState::Degraded => "degraded",
            BackgroundState::Unknown => "unknown",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, BackgroundState::Running | BackgroundState::Degraded)
    }
}

impl fmt::Display for BackgroundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackgroundState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "created" => BackgroundState::Created,
            "starting" => BackgroundState::Starting,
            "started" | "running" => BackgroundState::Running,
            "stopping" => BackgroundState::Stopping,
            "stopped" => BackgroundState::Stopped,
            "degraded" => BackgroundState::Degraded,
            "unknown" => BackgroundState::Unknown,
            other => return Err(format!("unknown state '{other}'")),
        })
    }
}
