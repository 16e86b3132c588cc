//! Job lifecycle driver.
//!
//! Each job runs on its own task:
//!
//! ```text
//! queued -> starting -> initializing -> launching_browser -> running
//!   running -> blocked | error
//!   running -> completed                                   (full-auto)
//!   running -> reviewing -> awaiting_confirmation          (review)
//!     awaiting_confirmation -> submitting -> completed     (submit)
//!     awaiting_confirmation -> cancelled                   (cancel)
//! ```
//!
//! The browser owned by a run is released before the terminal state is
//! written, including when the lifecycle panics.

use crate::bus::ProgressBus;
use crate::engine::{
    AutomationEngine, EngineTask, RunHistory, RunOutcome, RunPhase, SubmissionAuthority,
    SubmissionGrant,
};
use crate::gate::ConfirmationGate;
use crate::health::{HealthChecker, HealthReport};
use crate::prompt::compose_task;
use crate::registry::{JobRegistry, JobSummary};
use formpilot_browser::{BrowserHandle, BrowserLauncher, PageInspector, Protection};
use formpilot_core::{
    Config, Decision, Error, JobId, JobMode, JobRequest, JobSnapshot, JobSpec, JobState,
    ProgressEvent, Result,
};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Deadline for a single engine run. `None` waits indefinitely.
    pub run_timeout: Option<Duration>,
    pub event_buffer: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            run_timeout: Some(Duration::from_secs(1800)),
            event_buffer: 64,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            run_timeout: match config.engine.run_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            event_buffer: config.jobs.event_buffer,
        }
    }
}

/// How a lifecycle ended, before it is written to the registry.
#[derive(Debug)]
enum Ending {
    Completed(String),
    Blocked { reason: String, message: String },
    Cancelled(String),
    Failed(String),
}

impl Ending {
    fn from_error(err: Error) -> Self {
        match err {
            Error::ProtectionDetected(reason) => Ending::Blocked {
                message: format!("Blocked by site protection: {}", reason),
                reason,
            },
            other => Ending::Failed(other.to_string()),
        }
    }

    fn blocked(reason: impl Into<String>, when: &str) -> Self {
        let reason = reason.into();
        Ending::Blocked {
            message: format!("Blocked by site protection ({}): {}", when, reason),
            reason,
        }
    }
}

struct Inner {
    registry: JobRegistry,
    bus: ProgressBus,
    gate: ConfirmationGate,
    launcher: Arc<dyn BrowserLauncher>,
    inspector: Arc<dyn PageInspector>,
    engine: Arc<dyn AutomationEngine>,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    /// Held across a registry write and its publish so subscribers see
    /// events in the order the registry recorded them.
    order: Mutex<()>,
    settings: OrchestratorSettings,
}

impl Inner {
    async fn transition(
        &self,
        job_id: &str,
        next: JobState,
        progress: u8,
        message: &str,
    ) -> Result<()> {
        let _order = self.order.lock().await;
        let event = self.registry.advance(job_id, next, progress, message).await?;
        self.bus.publish(event).await;
        Ok(())
    }

    async fn note(&self, job_id: &str, message: &str) {
        let _order = self.order.lock().await;
        if let Ok(event) = self.registry.note(job_id, message).await {
            self.bus.publish(event).await;
        }
    }

    /// Write the terminal state unless an external cancel already did.
    async fn finish(&self, job_id: &str, ending: Ending) {
        let (state, progress, message, reason) = match &ending {
            Ending::Completed(msg) => (JobState::Completed, 100, msg.as_str(), None),
            Ending::Blocked { reason, message } => {
                (JobState::Blocked, 0, message.as_str(), Some(reason.as_str()))
            }
            Ending::Cancelled(msg) => (JobState::Cancelled, 0, msg.as_str(), None),
            Ending::Failed(msg) => (JobState::Error, 0, msg.as_str(), None),
        };

        {
            let _order = self.order.lock().await;
            let written = self
                .registry
                .finish_unless_terminal(job_id, state, progress, message, reason)
                .await;
            match written {
                Ok(Some(event)) => {
                    match &ending {
                        Ending::Completed(_) => info!(job_id, "Job completed"),
                        Ending::Blocked { reason, .. } => {
                            warn!(job_id, reason = %reason, "Job blocked by site protection")
                        }
                        Ending::Cancelled(_) => info!(job_id, "Job cancelled"),
                        Ending::Failed(msg) => warn!(job_id, error = %msg, "Job failed"),
                    }
                    self.bus.publish(event).await;
                }
                Ok(None) => {
                    debug!(job_id, ?ending, "Job already terminal, lifecycle result dropped");
                }
                Err(Error::NotFound(_)) => debug!(job_id, "Job purged before its lifecycle ended"),
                Err(e) => {
                    error!(job_id, "Could not record job ending: {}", e);
                    let fallback = format!("Internal error: {}", e);
                    if let Ok(Some(event)) = self
                        .registry
                        .finish_unless_terminal(job_id, JobState::Error, 0, &fallback, None)
                        .await
                    {
                        self.bus.publish(event).await;
                    }
                }
            }
        }

        self.gate.discard(job_id).await;
        self.bus.close(job_id).await;
        self.tokens.lock().await.remove(job_id);
    }
}

/// Public entry point for creating and steering jobs. Cheap to clone.
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl TaskOrchestrator {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        inspector: Arc<dyn PageInspector>,
        engine: Arc<dyn AutomationEngine>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: JobRegistry::new(),
                bus: ProgressBus::new(settings.event_buffer),
                gate: ConfirmationGate::new(),
                launcher,
                inspector,
                engine,
                tokens: Mutex::new(HashMap::new()),
                order: Mutex::new(()),
                settings,
            }),
        }
    }

    /// Validate and register a job, then start it in the background.
    /// Returns as soon as the job is `queued`.
    pub async fn create_job(&self, request: JobRequest) -> Result<JobId> {
        let spec = request.validate()?;
        if !self.inner.engine.is_configured() {
            return Err(Error::EngineUnavailable(
                "automation engine endpoint or API key is not configured".to_string(),
            ));
        }

        let snapshot = self.inner.registry.insert(spec.clone()).await;
        let job_id = snapshot.job_id;
        self.inner.bus.open(&job_id).await;

        let token = CancellationToken::new();
        self.inner
            .tokens
            .lock()
            .await
            .insert(job_id.clone(), token.clone());

        info!(job_id = %job_id, target = %spec.target, mode = %spec.mode, "Job created");

        let lifecycle = Lifecycle {
            inner: self.inner.clone(),
            job_id: job_id.clone(),
            spec,
            token,
            browser: None,
        };
        tokio::spawn(lifecycle.run());

        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<JobSnapshot> {
        self.inner.registry.get(job_id).await
    }

    /// Answer the confirmation gate of a parked job. Accepted once.
    pub async fn decide(&self, job_id: &str, decision: Decision) -> Result<()> {
        let state = self.inner.registry.state(job_id).await?;
        if state != JobState::AwaitingConfirmation {
            return Err(Error::InvalidState(format!(
                "job {} is {}, not awaiting confirmation",
                job_id, state
            )));
        }
        self.inner.gate.decide(job_id, decision).await?;
        info!(job_id, ?decision, "Decision recorded");
        Ok(())
    }

    /// Live feed of the job's events. Ends after the terminal event.
    pub async fn subscribe(&self, job_id: &str) -> Result<broadcast::Receiver<ProgressEvent>> {
        self.inner.registry.state(job_id).await?;
        match self.inner.bus.subscribe(job_id).await {
            Some(rx) => Ok(rx),
            None => {
                // Already finished: hand out a stream that is closed from the start.
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                Ok(rx)
            }
        }
    }

    /// Cancel a job that has not finished. The registry entry is written
    /// `cancelled` right away; the lifecycle winds down and frees its browser.
    pub async fn cancel_job(&self, job_id: &str) -> Result<JobSnapshot> {
        let state = self.inner.registry.state(job_id).await?;
        if state.is_terminal() {
            return Err(Error::InvalidState(format!(
                "job {} already finished as {}",
                job_id, state
            )));
        }

        self.inner
            .transition(job_id, JobState::Cancelled, 0, "Cancelled by request")
            .await?;
        if let Some(token) = self.inner.tokens.lock().await.get(job_id) {
            token.cancel();
        }
        self.inner.gate.discard(job_id).await;
        info!(job_id, from = %state, "Job cancelled by request");

        self.inner.registry.get(job_id).await
    }

    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.inner.registry.list().await
    }

    pub async fn summary(&self) -> JobSummary {
        self.inner.registry.summary().await
    }

    /// Forget terminal jobs older than `max_age`.
    pub async fn purge_finished(&self, max_age: Duration) -> usize {
        let removed = self.inner.registry.purge_finished(max_age).await;
        for id in &removed {
            self.inner.bus.close(id).await;
        }
        removed.len()
    }

    /// Cancel every unfinished job (used on shutdown).
    pub async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for id in self.inner.registry.active_ids().await {
            if self.cancel_job(&id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn health(&self) -> HealthReport {
        HealthChecker::check(
            self.inner.engine.as_ref(),
            self.inner.launcher.as_ref(),
            self.summary().await,
        )
        .await
    }
}

/// State owned by one running job.
struct Lifecycle {
    inner: Arc<Inner>,
    job_id: JobId,
    spec: JobSpec,
    token: CancellationToken,
    browser: Option<BrowserHandle>,
}

impl Lifecycle {
    async fn run(mut self) {
        let ending = match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(Ok(ending)) => ending,
            Ok(Err(e)) => Ending::from_error(e),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(job_id = %self.job_id, "Job lifecycle panicked: {}", detail);
                Ending::Failed(format!("Internal error: {}", detail))
            }
        };

        if let Some(handle) = self.browser.take() {
            debug!(job_id = %self.job_id, pid = ?handle.process_id, "Releasing browser");
            self.inner.launcher.release(handle).await;
        }
        self.inner.finish(&self.job_id, ending).await;
    }

    async fn step(&self, next: JobState, progress: u8, message: &str) -> Result<()> {
        self.inner
            .transition(&self.job_id, next, progress, message)
            .await
    }

    /// `None` when the job is cancelled first.
    async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    async fn execute(&mut self) -> Result<Ending> {
        let cancelled = || Ending::Cancelled("Cancelled".to_string());

        self.step(JobState::Starting, 5, "Starting job").await?;

        let authority = match self.spec.mode {
            JobMode::FullAuto => {
                let grant = SubmissionGrant::full_auto();
                info!(job_id = %self.job_id, basis = ?grant.basis(), "Submission granted");
                SubmissionAuthority::Granted(grant)
            }
            JobMode::Review => SubmissionAuthority::Withheld,
        };
        let prompt = compose_task(&self.spec, &authority, RunPhase::Fill);
        self.step(
            JobState::Initializing,
            10,
            &format!("Preparing application for {}", self.spec.target),
        )
        .await?;

        self.step(JobState::LaunchingBrowser, 15, "Launching browser")
            .await?;
        let launched = self
            .cancellable(self.inner.launcher.launch(&self.job_id))
            .await;
        let handle = match launched {
            None => return Ok(cancelled()),
            Some(result) => result?,
        };
        let cdp_url = handle.debug_endpoint.clone();
        self.browser = Some(handle);

        self.step(JobState::Running, 20, "Browser attached, running automation")
            .await?;

        if let Some(ending) = self.preflight().await {
            return Ok(ending);
        }

        let task = EngineTask {
            job_id: self.job_id.clone(),
            prompt,
            cdp_url: cdp_url.clone(),
            phase: RunPhase::Fill,
            authority,
        };
        let history = match self.run_engine(task).await {
            Err(ending) => return Ok(ending),
            Ok(RunOutcome::Blocked(reason)) => return Ok(Ending::blocked(reason, "during run")),
            Ok(RunOutcome::Failed(msg)) => {
                return Ok(Ending::Failed(format!("Automation failed: {}", msg)))
            }
            Ok(RunOutcome::Success(history)) => history,
        };
        self.record_history(&history).await;

        if let Some(ending) = self.postflight().await {
            return Ok(ending);
        }

        match self.spec.mode {
            JobMode::FullAuto => Ok(Ending::Completed(if history.summary.is_empty() {
                "Application completed".to_string()
            } else {
                history.summary
            })),
            JobMode::Review => self.review(history, cdp_url).await,
        }
    }

    async fn review(&mut self, history: RunHistory, cdp_url: String) -> Result<Ending> {
        self.step(JobState::Reviewing, 80, "Reviewing automation result")
            .await?;
        if !history.ready_for_review {
            return Ok(Ending::Failed(
                "Automation ended without reaching the review checkpoint".to_string(),
            ));
        }

        let slot = self.inner.gate.open(&self.job_id).await?;
        self.step(
            JobState::AwaitingConfirmation,
            90,
            "Ready for review: awaiting submit or cancel decision",
        )
        .await?;

        let decision = match self.cancellable(slot).await {
            None | Some(Err(_)) => return Ok(Ending::Cancelled("Cancelled".to_string())),
            Some(Ok(decision)) => decision,
        };
        let Some(grant) = SubmissionGrant::from_decision(decision) else {
            return Ok(Ending::Cancelled("Cancelled by reviewer".to_string()));
        };
        info!(job_id = %self.job_id, basis = ?grant.basis(), "Submission granted");

        self.step(JobState::Submitting, 95, "Submission approved, submitting")
            .await?;
        let task = EngineTask {
            job_id: self.job_id.clone(),
            prompt: compose_task(
                &self.spec,
                &SubmissionAuthority::Granted(grant.clone()),
                RunPhase::Submit,
            ),
            cdp_url,
            phase: RunPhase::Submit,
            authority: SubmissionAuthority::Granted(grant),
        };
        match self.run_engine(task).await {
            Err(ending) => Ok(ending),
            Ok(RunOutcome::Success(done)) => {
                self.record_history(&done).await;
                if let Some(ending) = self.postflight().await {
                    return Ok(ending);
                }
                Ok(Ending::Completed(if done.summary.is_empty() {
                    "Application submitted".to_string()
                } else {
                    done.summary
                }))
            }
            Ok(RunOutcome::Blocked(reason)) => Ok(Ending::blocked(reason, "during submission")),
            Ok(RunOutcome::Failed(msg)) => Ok(Ending::Failed(format!("Submission failed: {}", msg))),
        }
    }

    /// Run the engine under the cancellation token and the run deadline.
    /// `Err` carries the ending when neither produced an outcome.
    async fn run_engine(&self, task: EngineTask) -> std::result::Result<RunOutcome, Ending> {
        let run = self.inner.engine.run(task);
        let deadline = self.inner.settings.run_timeout;
        let bounded = async move {
            match deadline {
                Some(limit) => tokio::time::timeout(limit, run).await.ok(),
                None => Some(run.await),
            }
        };
        match self.cancellable(bounded).await {
            None => Err(Ending::Cancelled("Cancelled".to_string())),
            Some(None) => Err(Ending::Failed(format!(
                "Automation timed out after {}s",
                deadline.map_or(0, |d| d.as_secs())
            ))),
            Some(Some(outcome)) => Ok(outcome),
        }
    }

    async fn record_history(&self, history: &RunHistory) {
        for step in &history.steps {
            self.inner.note(&self.job_id, step).await;
        }
        if let Some(creds) = &history.credentials {
            match self
                .inner
                .registry
                .set_credentials(&self.job_id, creds.clone())
                .await
            {
                Ok(true) => {
                    self.inner
                        .note(&self.job_id, &format!("Account created on {}", creds.target))
                        .await
                }
                Ok(false) => debug!(job_id = %self.job_id, "Credentials already recorded, keeping the first"),
                Err(e) => debug!(job_id = %self.job_id, "Could not record credentials: {}", e),
            }
        }
        if !history.documents_needed.is_empty() {
            self.inner
                .note(
                    &self.job_id,
                    &format!(
                        "Documents to upload manually: {}",
                        history.documents_needed.join(", ")
                    ),
                )
                .await;
        }
    }

    /// Load the start page and check it before the engine touches it.
    async fn preflight(&self) -> Option<Ending> {
        let url = self.spec.start_url.as_deref()?;
        let handle = self.browser.as_ref()?;
        match self.cancellable(self.inner.inspector.load(handle, url)).await {
            None => Some(Ending::Cancelled("Cancelled".to_string())),
            Some(Ok(page)) => match page.protection() {
                Protection::Blocked(reason) => {
                    let details = formpilot_browser::protection::details(&page.headers, &page.html);
                    warn!(job_id = %self.job_id, url, ?details, "Pre-flight check found protection");
                    Some(Ending::blocked(reason.to_string(), "pre-flight"))
                }
                Protection::Accessible => {
                    self.inner
                        .note(&self.job_id, "Pre-flight check passed")
                        .await;
                    None
                }
            },
            Some(Err(e)) => {
                warn!(job_id = %self.job_id, url, "Pre-flight check skipped: {}", e);
                None
            }
        }
    }

    /// Re-check the page the engine left behind.
    async fn postflight(&self) -> Option<Ending> {
        let handle = self.browser.as_ref()?;
        match self.cancellable(self.inner.inspector.capture(handle)).await {
            None => Some(Ending::Cancelled("Cancelled".to_string())),
            Some(Ok(Some(page))) => match page.protection() {
                Protection::Blocked(reason) => {
                    let details = formpilot_browser::protection::details(&page.headers, &page.html);
                    warn!(job_id = %self.job_id, url = %page.url, ?details, "Post-flight check found protection");
                    Some(Ending::blocked(reason.to_string(), "post-flight"))
                }
                Protection::Accessible => None,
            },
            Some(Ok(None)) => None,
            Some(Err(e)) => {
                debug!(job_id = %self.job_id, "Post-flight check skipped: {}", e);
                None
            }
        }
    }
}
