//! Best-effort removal of transient directories left behind by exports.

mod sweeper;

pub use sweeper::{CleanupError, SweepReport, TmpSweeper};
