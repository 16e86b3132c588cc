use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque job identifier (UUID v4 string).
pub type JobId = String;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Starting,
    Initializing,
    LaunchingBrowser,
    Running,
    /// Site protection stopped this attempt. No further transitions.
    Blocked,
    Reviewing,
    AwaitingConfirmation,
    Submitting,
    Completed,
    Cancelled,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Starting => "starting",
            JobState::Initializing => "initializing",
            JobState::LaunchingBrowser => "launching_browser",
            JobState::Running => "running",
            JobState::Blocked => "blocked",
            JobState::Reviewing => "reviewing",
            JobState::AwaitingConfirmation => "awaiting_confirmation",
            JobState::Submitting => "submitting",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Error => "error",
        }
    }

    /// True for states with no outgoing transitions (blocked included).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Blocked | JobState::Completed | JobState::Cancelled | JobState::Error
        )
    }

    /// States that reset progress to zero on entry.
    pub fn resets_progress(&self) -> bool {
        matches!(self, JobState::Blocked | JobState::Error)
    }

    /// Structural edges of the lifecycle graph. Mode-specific edges
    /// (`running -> completed` only for full-auto, the review branch only
    /// for review) are checked by [`JobMode::permits`].
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Error) | (_, Cancelled) => true,
            (Queued, Starting)
            | (Starting, Initializing)
            | (Initializing, LaunchingBrowser)
            | (LaunchingBrowser, Running)
            | (Running, Blocked)
            | (Running, Reviewing)
            | (Running, Completed)
            | (Reviewing, AwaitingConfirmation)
            | (AwaitingConfirmation, Submitting)
            | (Submitting, Blocked)
            | (Submitting, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much autonomy a job has over the final, irrevocable site action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Park before the final step until a human decides.
    #[serde(alias = "semi")]
    Review,
    /// Submit without review. Must be requested explicitly at creation.
    #[serde(alias = "full")]
    FullAuto,
}

impl JobMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "review" | "semi" => Some(JobMode::Review),
            "full_auto" | "full-auto" | "fullauto" | "full" => Some(JobMode::FullAuto),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Review => "review",
            JobMode::FullAuto => "full_auto",
        }
    }

    /// Whether a transition into `next` from `from` is allowed in this mode.
    pub fn permits(&self, from: JobState, next: JobState) -> bool {
        match (self, from, next) {
            (JobMode::Review, JobState::Running, JobState::Completed) => false,
            (JobMode::FullAuto, _, JobState::Reviewing)
            | (JobMode::FullAuto, _, JobState::AwaitingConfirmation)
            | (JobMode::FullAuto, _, JobState::Submitting) => false,
            _ => true,
        }
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reviewer's answer at the confirmation gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Submit,
    Cancel,
}

impl Decision {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "submit" | "approve" => Some(Decision::Submit),
            "cancel" => Some(Decision::Cancel),
            _ => None,
        }
    }
}

/// Account created on the target site during a run.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
    pub target: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"[REDACTED]")
            .field("target", &self.target)
            .finish()
    }
}

/// Raw job request as received from a caller. Every field is optional so
/// that missing fields surface as `InvalidSpec` instead of a decode error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    #[serde(default, alias = "university_name", alias = "universityName")]
    pub target: Option<String>,
    #[serde(default, alias = "student_id", alias = "studentId")]
    pub subject_id: Option<String>,
    #[serde(default, alias = "student_data", alias = "studentData")]
    pub profile: Option<serde_json::Value>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default, alias = "custom_prompt", alias = "customPrompt")]
    pub task: Option<String>,
    #[serde(default, alias = "start_url")]
    pub start_url: Option<String>,
}

impl JobRequest {
    pub fn validate(self) -> Result<JobSpec> {
        let mode_raw = self
            .mode
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::InvalidSpec("mode is required (review or full_auto)".into()))?;
        let mode = JobMode::parse(mode_raw)
            .ok_or_else(|| Error::InvalidSpec(format!("unknown mode '{}'", mode_raw)))?;

        let target = self
            .target
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidSpec("target is required".into()))?;

        let profile = match self.profile {
            None | Some(serde_json::Value::Null) => serde_json::Value::Object(Default::default()),
            Some(v @ serde_json::Value::Object(_)) => v,
            Some(_) => return Err(Error::InvalidSpec("profile must be a JSON object".into())),
        };

        let start_url = match self.start_url.map(|u| u.trim().to_string()) {
            Some(u) if u.is_empty() => None,
            Some(u) if u.starts_with("http://") || u.starts_with("https://") => Some(u),
            Some(u) => {
                return Err(Error::InvalidSpec(format!(
                    "startUrl must be an http(s) URL, got '{}'",
                    u
                )))
            }
            None => None,
        };

        Ok(JobSpec {
            target,
            subject_id: self.subject_id.filter(|s| !s.trim().is_empty()),
            profile,
            mode,
            task: self.task.filter(|t| !t.trim().is_empty()),
            start_url,
        })
    }
}

/// A validated job specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub target: String,
    pub subject_id: Option<String>,
    pub profile: serde_json::Value,
    pub mode: JobMode,
    pub task: Option<String>,
    pub start_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub state: JobState,
    pub progress: u8,
    pub at: DateTime<Utc>,
}

/// Read-only view of a job handed out by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub target: String,
    pub subject_id: Option<String>,
    pub mode: JobMode,
    pub state: JobState,
    pub progress: u8,
    pub last_message: Option<String>,
    pub messages: Vec<String>,
    pub credentials: Option<Credentials>,
    pub pending_decision: bool,
    pub blocked_reason: Option<String>,
    pub transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn visited(&self, state: JobState) -> bool {
        self.transitions.iter().any(|t| t.state == state)
    }
}

/// Emitted on every job change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub state: JobState,
    pub progress: u8,
    pub message: String,
    pub messages: Vec<String>,
    pub credentials: Option<Credentials>,
    pub timestamp: DateTime<Utc>,
}
