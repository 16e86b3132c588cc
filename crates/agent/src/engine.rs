//! Boundary to the external automation engine.
//!
//! The engine is the LLM-driven agent that actually reads pages and clicks.
//! Everything it reports is classified here into a [`RunOutcome`] so the
//! orchestrator never inspects free-text errors.

use async_trait::async_trait;
use formpilot_core::config::EngineConfig;
use formpilot_core::{Credentials, Decision, JobId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Engine errors containing any of these are site blocks, not bugs.
const BLOCKING_INDICATORS: &[&str] = &[
    "cloudflare",
    "captcha",
    "access denied",
    "rate limit",
    "too many requests",
    "verify you are human",
    "bot detection",
    "blocked",
];

/// Why a submission is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantBasis {
    FullAuto,
    ReviewerApproved,
}

/// Permission to perform the final, irrevocable site action.
///
/// Only this crate can mint one: either because the job was created in
/// full-auto mode or because a reviewer answered `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionGrant {
    basis: GrantBasis,
}

impl SubmissionGrant {
    pub(crate) fn full_auto() -> Self {
        Self {
            basis: GrantBasis::FullAuto,
        }
    }

    pub(crate) fn from_decision(decision: Decision) -> Option<Self> {
        match decision {
            Decision::Submit => Some(Self {
                basis: GrantBasis::ReviewerApproved,
            }),
            Decision::Cancel => None,
        }
    }

    pub fn basis(&self) -> GrantBasis {
        self.basis
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionAuthority {
    Withheld,
    Granted(SubmissionGrant),
}

impl SubmissionAuthority {
    pub fn allows_submission(&self) -> bool {
        matches!(self, SubmissionAuthority::Granted(_))
    }
}

/// Which part of the application an engine run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Navigate and fill every form.
    Fill,
    /// Press the final submit button on an already filled form.
    Submit,
}

#[derive(Debug, Clone)]
pub struct EngineTask {
    pub job_id: JobId,
    pub prompt: String,
    /// Control channel of the supervised browser.
    pub cdp_url: String,
    pub phase: RunPhase,
    pub authority: SubmissionAuthority,
}

/// What a successful run reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunHistory {
    pub ready_for_review: bool,
    pub summary: String,
    pub credentials: Option<Credentials>,
    pub steps: Vec<String>,
    pub documents_needed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success(RunHistory),
    Blocked(String),
    Failed(String),
}

/// Map an engine error text to `Blocked` when it names a site block.
pub fn classify_failure(message: impl Into<String>) -> RunOutcome {
    let message = message.into();
    let lower = message.to_lowercase();
    if BLOCKING_INDICATORS.iter().any(|i| lower.contains(i)) {
        RunOutcome::Blocked(message)
    } else {
        RunOutcome::Failed(message)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub configured: bool,
    pub reachable: bool,
    pub detail: String,
}

#[async_trait]
pub trait AutomationEngine: Send + Sync {
    /// Endpoint and credential present.
    fn is_configured(&self) -> bool;

    async fn health(&self) -> EngineHealth;

    async fn run(&self, task: EngineTask) -> RunOutcome;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCredentials {
    #[serde(alias = "email", alias = "username")]
    identifier: String,
    #[serde(alias = "password")]
    secret: String,
    #[serde(default, alias = "university")]
    target: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "ready_for_review")]
    ready_for_review: Option<bool>,
    #[serde(default, alias = "account_created")]
    credentials: Option<WireCredentials>,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default, alias = "documents_needed")]
    documents_needed: Vec<String>,
}

impl RunResponse {
    fn into_outcome(self) -> RunOutcome {
        let message = self.message.unwrap_or_default();
        match self.status.to_lowercase().as_str() {
            "success" | "completed" | "ok" => RunOutcome::Success(RunHistory {
                ready_for_review: self.ready_for_review.unwrap_or(true),
                summary: message,
                credentials: self.credentials.map(|c| Credentials {
                    identifier: c.identifier,
                    secret: c.secret,
                    target: c.target,
                }),
                steps: self.steps,
                documents_needed: self.documents_needed,
            }),
            "blocked" => RunOutcome::Blocked(if message.is_empty() {
                "engine reported a site block".to_string()
            } else {
                message
            }),
            other => classify_failure(if message.is_empty() {
                format!("engine returned status '{}'", other)
            } else {
                message
            }),
        }
    }
}

/// Talks to an automation engine service over HTTP.
pub struct HttpAutomationEngine {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    model: String,
}

impl HttpAutomationEngine {
    pub fn from_config(config: &EngineConfig) -> Self {
        // Runs last minutes; the orchestrator owns the overall deadline.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: config.endpoint(),
            api_key: config.resolved_api_key(),
            model: config.model.clone(),
        }
    }

    fn endpoint_url(&self, path: &str) -> Option<String> {
        self.endpoint.as_ref().map(|e| format!("{}{}", e, path))
    }
}

#[async_trait]
impl AutomationEngine for HttpAutomationEngine {
    fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    async fn health(&self) -> EngineHealth {
        let Some(url) = self.endpoint_url("/health") else {
            return EngineHealth {
                configured: false,
                reachable: false,
                detail: "engine.endpoint is not set".to_string(),
            };
        };
        let configured = self.is_configured();

        let result = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        let (reachable, mut detail) = match result {
            Ok(resp) if resp.status().is_success() => (true, "engine reachable".to_string()),
            Ok(resp) => (false, format!("engine health returned HTTP {}", resp.status().as_u16())),
            Err(e) => (false, format!("engine unreachable: {}", e)),
        };
        if !configured {
            detail = format!("API key missing; {}", detail);
        }
        EngineHealth {
            configured,
            reachable,
            detail,
        }
    }

    async fn run(&self, task: EngineTask) -> RunOutcome {
        let (Some(url), Some(key)) = (self.endpoint_url("/run"), self.api_key.as_ref()) else {
            return RunOutcome::Failed("automation engine is not configured".to_string());
        };

        let body = json!({
            "jobId": task.job_id,
            "task": task.prompt,
            "cdpUrl": task.cdp_url,
            "phase": task.phase,
            "allowSubmission": task.authority.allows_submission(),
            "model": self.model,
        });
        debug!(job_id = %task.job_id, phase = ?task.phase, "Dispatching engine run");

        let resp = match self.client.post(&url).bearer_auth(key).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return RunOutcome::Failed(format!("engine request failed: {}", e)),
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return RunOutcome::Failed(format!("engine response unreadable: {}", e)),
        };

        if !status.is_success() {
            warn!(job_id = %task.job_id, status = status.as_u16(), "Engine run returned an error status");
            return classify_failure(format!("engine HTTP {}: {}", status.as_u16(), text.trim()));
        }

        match serde_json::from_str::<RunResponse>(&text) {
            Ok(parsed) => parsed.into_outcome(),
            Err(e) => RunOutcome::Failed(format!("invalid engine response: {}", e)),
        }
    }
}
