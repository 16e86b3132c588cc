use crate::engine::{RunPhase, SubmissionAuthority};
use formpilot_core::JobSpec;
use serde_json::Value;

const HALT_DIRECTIVE: &str = "\
## Submission policy
You MUST NOT click the final 'Submit' button or any equivalent \
('Submit Application', 'Confirm', 'Send', 'Finalize', ...).
When you reach the final submission step, stop and report: \
\"Ready for Review - Form Completion Halted per Security Protocol\". \
List the fields you filled, the documents that must be uploaded manually, \
and any account credentials you created.";

const SUBMIT_ALLOWED_DIRECTIVE: &str = "\
## Submission policy
This application was authorized for automatic submission. Once every \
required field is complete, submit it and report the confirmation shown \
by the site. Report any account credentials you created.";

const SUBMIT_PHASE_DIRECTIVE: &str = "\
## Submission policy
A reviewer approved the filled application in this browser. Press the \
final submit button now, then report the confirmation message or \
reference number shown by the site. Do not change any field.";

/// Build the task text handed to the automation engine.
///
/// The policy block always reflects `authority`; a caller-supplied task is
/// wrapped, never used verbatim.
pub fn compose_task(spec: &JobSpec, authority: &SubmissionAuthority, phase: RunPhase) -> String {
    let policy = match (phase, authority.allows_submission()) {
        (RunPhase::Submit, true) => SUBMIT_PHASE_DIRECTIVE,
        (RunPhase::Fill, true) => SUBMIT_ALLOWED_DIRECTIVE,
        (_, false) => HALT_DIRECTIVE,
    };

    if phase == RunPhase::Submit {
        return format!("{}\n\n## Target\n{}\n", policy, spec.target);
    }

    let body = match &spec.task {
        Some(task) => task.trim().to_string(),
        None => default_task(spec),
    };
    format!("{}\n\n## Your task\n{}\n\n{}\n", policy, body, render_profile(&spec.profile))
}

fn default_task(spec: &JobSpec) -> String {
    let mut task = match &spec.start_url {
        Some(url) => format!("Open {} and complete the application for {}.", url, spec.target),
        None => format!(
            "Find the official application portal for {} and complete the application.",
            spec.target
        ),
    };
    task.push_str(
        "\nCreate an account if the portal requires one and report its credentials. \
         Leave unknown fields blank and skip document uploads, noting which documents are required.",
    );
    task
}

fn render_profile(profile: &Value) -> String {
    let Some(fields) = profile.as_object().filter(|o| !o.is_empty()) else {
        return "## Applicant information\n(none provided)".to_string();
    };
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();

    let mut out = String::from("## Applicant information");
    for key in keys {
        let value = match &fields[key] {
            Value::String(s) => s.clone(),
            Value::Null => continue,
            other => other.to_string(),
        };
        out.push_str(&format!("\n- {}: {}", key.replace('_', " "), value));
    }
    out
}
