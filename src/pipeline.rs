//! Phase runner: steps, the shared context and the error ledger.

pub mod config;
pub mod context;
pub mod phase;
pub mod step;

pub use config::{ErrorPolicy, PhaseConfig};
pub use context::{Context, Disposition, Event, EventKind, RowEvents};
pub use phase::{Phase, PhaseStats};
pub use step::{Step, StepFn, StepKind, StepResult};
