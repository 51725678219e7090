mod backoff;
mod classifier;
mod planner;
mod scheduler;
pub mod shutdown;
mod submitter;

pub use planner::{Planner, Target};
pub use scheduler::{interval_from_hours, Scheduler};
pub use shutdown::Shutdown;
pub use submitter::SubmissionLoop;
