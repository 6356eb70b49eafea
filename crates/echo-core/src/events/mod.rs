//! Platform event model consumed by the decision orchestrator.

mod event;

pub use event::{EventKind, InteractionKind, PlatformEvent};
