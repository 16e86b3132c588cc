use crate::engine::{AutomationEngine, EngineHealth};
use crate::registry::JobSummary;
use formpilot_browser::BrowserLauncher;
use serde::Serialize;
use tracing::{debug, warn};

/// Readiness report served on `/health` and printed by `doctor`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Engine configured and reachable, browser available.
    pub ready: bool,
    pub engine: EngineHealth,
    pub browser_available: bool,
    pub jobs: JobSummary,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.engine.configured {
            problems.push("automation engine is not configured".to_string());
        } else if !self.engine.reachable {
            problems.push(format!("automation engine: {}", self.engine.detail));
        }
        if !self.browser_available {
            problems.push("no browser executable found".to_string());
        }
        problems
    }
}

pub struct HealthChecker;

impl HealthChecker {
    pub async fn check(
        engine: &dyn AutomationEngine,
        launcher: &dyn BrowserLauncher,
        jobs: JobSummary,
    ) -> HealthReport {
        let engine = engine.health().await;
        let browser_available = launcher.is_available();
        let report = HealthReport {
            ready: engine.configured && engine.reachable && browser_available,
            engine,
            browser_available,
            jobs,
            checked_at: chrono::Utc::now(),
        };

        if report.ready {
            debug!("Health check passed");
        } else {
            warn!(problems = ?report.problems(), "Health check found problems");
        }
        report
    }
}
