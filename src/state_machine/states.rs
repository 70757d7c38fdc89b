use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a job, partition or step run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run created and executing
    #[default]
    Running,
    /// Every unit of work reached a successful terminal state
    Completed,
    /// At least one unit of work failed
    Failed,
    /// Dispatch was cancelled; in-flight work was allowed to finish
    Stopped,
}

impl RunStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            _ => Err(format!("Invalid run status: {s}")),
        }
    }
}

/// Phase of the chunk runner loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    /// Pulling items from the reader into the chunk buffer
    #[default]
    Reading,
    /// Handing the buffered chunk to the writer
    Writing,
    /// The chunk was written atomically
    Committed,
    /// A read, write or timeout fault aborted the chunk (terminal for the step)
    Failed,
    /// The reader is exhausted and nothing is buffered
    Done,
}

impl ChunkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Done)
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reading => write!(f, "reading"),
            Self::Writing => write!(f, "writing"),
            Self::Committed => write!(f, "committed"),
            Self::Failed => write!(f, "failed"),
            Self::Done => write!(f, "done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_terminal_check() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
        assert!(RunStatus::Completed.is_success());
        assert!(!RunStatus::Stopped.is_success());
    }

    #[test]
    fn test_run_status_string_conversion() {
        assert_eq!(RunStatus::Completed.to_string(), "COMPLETED");
        assert_eq!("FAILED".parse::<RunStatus>().unwrap(), RunStatus::Failed);
        assert!("DONE".parse::<RunStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&RunStatus::Running).unwrap(),
            "\"RUNNING\""
        );
    }

    #[test]
    fn test_chunk_state_terminal_check() {
        assert!(ChunkState::Done.is_terminal());
        assert!(ChunkState::Failed.is_terminal());
        assert!(!ChunkState::Committed.is_terminal());
        assert_eq!(ChunkState::default(), ChunkState::Reading);
    }
}
