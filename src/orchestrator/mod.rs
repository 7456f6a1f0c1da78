//! Export scheduling: the timer path, the on-demand path and the
//! exclusivity token shared by both.

mod invocation;
mod scheduler;

pub use invocation::{
    CleanupSummary, Invocation, InvocationSummary, InvokeError, Role, TickOutcome, Trigger,
};
pub use scheduler::{ExportOrchestrator, OrchestratorSettings};
