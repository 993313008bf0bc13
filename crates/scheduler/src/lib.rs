//! Trigger handling for quicksave
//!
//! This crate provides:
//! - Cooldown gate
//! - Process-wide context wiring the collaborators together
//! - Single-flight scheduler with keep-last coalescing and a background worker

pub mod context;
pub mod cooldown;
pub mod scheduler;

// Re-exports
pub use context::{Context, ContextError, StateLayout};
pub use cooldown::CooldownGate;
pub use scheduler::{
    JobReport, Rejection, Scheduler, SchedulerError, SchedulerState, SchedulerStatus, Submission,
    Trigger, TriggerKind,
};
