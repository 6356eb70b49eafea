//! echo-core - Core library for echo.
//!
//! This crate provides the sentiment scorer, the weighted voice selector,
//! the broadcast scheduler and the orchestrator that ties them together
//! for a chat bot that answers with short voice clips.
//!
//! # Example
//!
//! ```ignore
//! use echo_core::{AssetCatalog, DecisionOrchestrator, EchoConfig, InMemoryConfigStore, PlatformEvent};
//! use std::sync::Arc;
//!
//! let config = EchoConfig::from_file("echo.toml")?;
//! let catalog = AssetCatalog::load(&config.voice.directory)?;
//! let store = Arc::new(InMemoryConfigStore::new(config));
//! let orchestrator = DecisionOrchestrator::from_config(store, catalog);
//!
//! // Score a message and pick a clip
//! if let Some(response) = orchestrator.respond(&PlatformEvent::message("qq:42", "我好难过")) {
//!     println!("{} -> {}", response.session_id, response.path.display());
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod persistence;
pub mod schedule;
pub mod selection;
pub mod sentiment;
pub mod traits;

// Re-export commonly used types
pub use config::{
    ConfigStore, EchoConfig, FileConfigStore, InMemoryConfigStore, NightHours, ScheduleConfig,
};
pub use error::{EchoError, EchoResult, ErrorCode};
pub use events::{EventKind, InteractionKind, PlatformEvent};
pub use orchestrator::{Decision, DecisionOrchestrator, DecisionReason, Response};
pub use persistence::PersistenceWorker;
pub use schedule::{
    DedupLedger, DispatchReport, Frequency, SchedulerState, TriggerScheduler, TriggerSpec,
    TriggerState,
};
pub use selection::{
    AssetCatalog, AssetEntry, PersonaAdapter, QualityLevel, ResourceSelector, SelectorConfig,
};
pub use sentiment::{AnalysisResult, ContextStore, RuleRegistry, SentimentAnalyzer, SentimentConfig};
pub use traits::{Delivery, Sender};
