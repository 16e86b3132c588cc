use chrono::{DateTime, Utc};
use formpilot_core::{
    Credentials, Error, JobId, JobSnapshot, JobSpec, JobState, ProgressEvent, Result, Transition,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry-owned job record. Never leaves this module; callers get
/// [`JobSnapshot`] clones.
#[derive(Debug)]
struct Job {
    id: JobId,
    spec: JobSpec,
    state: JobState,
    progress: u8,
    messages: Vec<String>,
    credentials: Option<Credentials>,
    blocked_reason: Option<String>,
    transitions: Vec<Transition>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Job {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            target: self.spec.target.clone(),
            subject_id: self.spec.subject_id.clone(),
            mode: self.spec.mode,
            state: self.state,
            progress: self.progress,
            last_message: self.messages.last().cloned(),
            messages: self.messages.clone(),
            credentials: self.credentials.clone(),
            pending_decision: self.state == JobState::AwaitingConfirmation,
            blocked_reason: self.blocked_reason.clone(),
            transitions: self.transitions.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn event(&self, message: &str) -> ProgressEvent {
        ProgressEvent {
            job_id: self.id.clone(),
            state: self.state,
            progress: self.progress,
            message: message.to_string(),
            messages: self.messages.clone(),
            credentials: self.credentials.clone(),
            timestamp: self.updated_at,
        }
    }

    fn apply(&mut self, next: JobState, progress: u8, message: &str) -> Result<ProgressEvent> {
        if !self.state.can_transition_to(next) || !self.spec.mode.permits(self.state, next) {
            return Err(Error::InvalidState(format!(
                "job {} cannot move from {} to {} in {} mode",
                self.id, self.state, next, self.spec.mode
            )));
        }

        let now = Utc::now();
        self.progress = if next.resets_progress() {
            0
        } else if next == JobState::Cancelled {
            self.progress
        } else {
            self.progress.max(progress.min(100))
        };
        self.state = next;
        self.messages.push(message.to_string());
        self.transitions.push(Transition {
            state: next,
            progress: self.progress,
            at: now,
        });
        self.updated_at = now;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }

        tracing::debug!(job_id = %self.id, state = %next, progress = self.progress, "Job advanced");
        Ok(self.event(message))
    }
}

/// Job counts by state class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub queued: usize,
    pub active: usize,
    pub awaiting_confirmation: usize,
    pub completed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub total: usize,
}

/// Concurrency-safe job store. All mutation goes through methods that
/// enforce the lifecycle rules.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in `queued`.
    pub async fn insert(&self, spec: JobSpec) -> JobSnapshot {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            spec,
            state: JobState::Queued,
            progress: 0,
            messages: vec!["Job queued".to_string()],
            credentials: None,
            blocked_reason: None,
            transitions: vec![Transition {
                state: JobState::Queued,
                progress: 0,
                at: now,
            }],
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        let snapshot = job.snapshot();
        self.jobs.write().await.insert(id, job);
        snapshot
    }

    /// Move a job to `next`, appending `message`.
    ///
    /// Progress never goes down, except that `blocked` and `error` reset it
    /// to zero and `cancelled` keeps the last value.
    pub async fn advance(
        &self,
        job_id: &str,
        next: JobState,
        progress: u8,
        message: &str,
    ) -> Result<ProgressEvent> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        job.apply(next, progress, message)
    }

    /// Write a terminal state unless the job already has one. Both the check
    /// and the write happen under one lock, so a concurrent cancel either
    /// lands first (and `Ok(None)` comes back) or is rejected afterwards.
    pub async fn finish_unless_terminal(
        &self,
        job_id: &str,
        next: JobState,
        progress: u8,
        message: &str,
        blocked_reason: Option<&str>,
    ) -> Result<Option<ProgressEvent>> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        if job.state.is_terminal() {
            return Ok(None);
        }
        let event = job.apply(next, progress, message)?;
        if let Some(reason) = blocked_reason {
            job.blocked_reason = Some(reason.to_string());
        }
        Ok(Some(event))
    }

    /// Append a message without changing state.
    pub async fn note(&self, job_id: &str, message: &str) -> Result<ProgressEvent> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        job.messages.push(message.to_string());
        job.updated_at = Utc::now();
        Ok(job.event(message))
    }

    /// Record credentials the first time only. Returns whether they were stored.
    pub async fn set_credentials(&self, job_id: &str, credentials: Credentials) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        if job.credentials.is_some() {
            return Ok(false);
        }
        job.credentials = Some(credentials);
        job.updated_at = Utc::now();
        Ok(true)
    }

    pub async fn get(&self, job_id: &str) -> Result<JobSnapshot> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(Job::snapshot)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    pub async fn state(&self, job_id: &str) -> Result<JobState> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|j| j.state)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<JobSnapshot> = jobs.values().map(Job::snapshot).collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    pub async fn summary(&self) -> JobSummary {
        let jobs = self.jobs.read().await;
        let mut summary = JobSummary {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs.values() {
            match job.state {
                JobState::Queued => summary.queued += 1,
                JobState::AwaitingConfirmation => summary.awaiting_confirmation += 1,
                JobState::Completed => summary.completed += 1,
                JobState::Blocked => summary.blocked += 1,
                JobState::Cancelled => summary.cancelled += 1,
                JobState::Error => summary.failed += 1,
                _ => summary.active += 1,
            }
        }
        summary
    }

    /// Drop terminal jobs that finished more than `max_age` ago.
    pub async fn purge_finished(&self, max_age: std::time::Duration) -> Vec<JobId> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let mut jobs = self.jobs.write().await;
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|j| j.state.is_terminal() && j.finished_at.map_or(false, |f| f <= cutoff))
            .map(|j| j.id.clone())
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "Purged finished jobs");
        }
        expired
    }

    /// Ids of jobs that have not reached a terminal state.
    pub async fn active_ids(&self) -> Vec<JobId> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| !j.state.is_terminal())
            .map(|j| j.id.clone())
            .collect()
    }
}
