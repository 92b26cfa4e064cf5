pub mod orchestrator;

pub use orchestrator::CtsOrchestrator;

// Re-export commonly used types
pub use cts_core::{
    config::LabConfig,
    error::{CtsError, CtsResult},
    stats::RunStatistics,
};
