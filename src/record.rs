use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One submitted command, frozen at submission time.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommandRequest {
    pub raw: String,                    // Text as typed by the caller
    pub resolved: String,               // Text after alias substitution
    pub submitted_at: DateTime<Utc>,    // Submission timestamp
}

impl CommandRequest {
    pub fn new(raw: &str, resolved: &str) -> Self {
        Self {
            raw: raw.to_string(),
            resolved: resolved.to_string(),
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

/// Why a Failed execution failed. Recorded on the snapshot so callers can
/// tell an escalation denial apart from an ordinary non-zero exit.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Spawn,     // The OS never started the process
    Runtime,   // Process ran and exited non-zero
    Elevation, // Privilege escalation refused or unavailable
}

/// Public view of one execution. Cloned out of the registry; also the exact
/// shape appended to the journal.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecutionSnapshot {
    pub id: u64,                          // Registry-assigned identifier
    pub request: CommandRequest,          // The submission
    pub command_hash: String,             // SHA256 hash of the resolved command
    pub state: ExecutionState,            // Current lifecycle state
    pub stdout: String,                   // Captured standard output
    pub stderr: String,                   // Captured error output
    pub started_at: Option<DateTime<Utc>>, // Set when the process spawned
    pub ended_at: Option<DateTime<Utc>>,   // Set iff state is terminal
    pub exit_code: Option<i32>,           // Set only after a Running interval
    #[serde(default)]
    pub failure: Option<FailureKind>,     // Set only when state is Failed
    pub elevated: bool,                   // Ran through privilege escalation
}

pub fn hash_command(command: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command.trim().as_bytes());
    hex::encode(hasher.finalize())
}
