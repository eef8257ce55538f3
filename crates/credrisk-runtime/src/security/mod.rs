//! Security stages: audit supervision, input validation and output sanitization.

mod sanitizer;
mod supervisor;
mod validator;

pub use sanitizer::{
    OutputSanitizer, SanitizationOutcome, BLOCKED_PLACEHOLDER, PRECAUTION_PLACEHOLDER,
    REPORT_PLACEHOLDER, SANITIZER_AGENT_ID,
};
pub use supervisor::{SecuritySupervisor, SUPERVISOR_AGENT_ID};
pub use validator::{InputValidator, VALIDATOR_AGENT_ID};
