pub mod error;
pub mod scheduler;

pub use error::SweepError;
pub use scheduler::SweepScheduler;
