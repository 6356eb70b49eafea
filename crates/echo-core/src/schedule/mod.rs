//! Recurring broadcasts: trigger windows, per-session dedup and the
//! background dispatch loop.

mod ledger;
mod scheduler;
mod trigger;

pub use ledger::{DedupLedger, FailureOutcome, SessionRecord, LEDGER_FILE};
pub use scheduler::{DispatchReport, SchedulerState, TriggerScheduler, MAX_SLEEP, POLL_INTERVAL};
pub use trigger::{
    evaluate_trigger, seconds_until_next_trigger, trigger_key, Frequency, TriggerSpec,
    TriggerState, ONCE_KEY,
};
