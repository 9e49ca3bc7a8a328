//! Task lifecycle: planning arithmetic and the orchestrator state machine.

mod orchestrator;
mod plan;

pub use orchestrator::{NewTask, OrchestratorConfig, TaskOrchestrator};
pub use plan::{
    adjustment_delta, band_bounds, linear_backoff, split_viewers, viewers_per_minute, Clock,
    SystemClock,
};
