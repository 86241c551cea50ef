//! Order execution

pub mod execution;

pub use execution::{ExecutionEngine, ExecutionOutcome, RejectionReason};
