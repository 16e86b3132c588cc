pub mod bus;
pub mod engine;
pub mod gate;
pub mod health;
pub mod orchestrator;
pub mod prompt;
pub mod registry;

pub use bus::ProgressBus;
pub use engine::{
    AutomationEngine, EngineHealth, EngineTask, HttpAutomationEngine, RunHistory, RunOutcome,
    RunPhase, SubmissionAuthority,
};
pub use gate::ConfirmationGate;
pub use health::{HealthChecker, HealthReport};
pub use orchestrator::{OrchestratorSettings, TaskOrchestrator};
pub use registry::{JobRegistry, JobSummary};
