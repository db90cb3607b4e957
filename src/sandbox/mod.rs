pub mod runner;
pub mod stdout;

pub use runner::{RunOutcome, SandboxRunner, CANDIDATE_FILENAME, TIMEOUT_MARKER};
