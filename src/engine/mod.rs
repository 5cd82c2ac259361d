pub mod context;
pub mod dispatcher;
pub mod ingest;
pub mod matcher;
pub mod reconciler;

pub use context::ExecutionContext;
pub use dispatcher::ActionDispatcher;
pub use ingest::EventIngestor;
pub use matcher::{FlowMatch, TriggerMatcher, conditions_met, sort_actions};
pub use reconciler::CronReconciler;
