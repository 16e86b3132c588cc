pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
pub use types::{
    Credentials, Decision, JobId, JobMode, JobRequest, JobSnapshot, JobSpec, JobState,
    ProgressEvent, Transition,
};
