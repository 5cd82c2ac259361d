pub mod action;
pub mod catalog;
pub mod cron_job;
pub mod event;
pub mod flow;
pub mod trigger;

pub use action::{Action, ActionSpec, ActionStatus, FAILURE_REASON_KEY};
pub use catalog::{ActionTypeDef, EventTypeDef};
pub use cron_job::CronJobDefinition;
pub use event::Event;
pub use flow::{Flow, FlowStatus};
pub use trigger::{Condition, ConditionOp, Trigger, TriggerSpec};
