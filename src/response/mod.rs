//! Automated response: playbooks, action handlers, and the remediation
//! engine that drives them.

pub mod actions;
pub mod engine;
pub mod playbook;

pub use actions::{ActionHandler, ActionOutcome, builtin_handlers};
pub use engine::{RemediationEngine, RemediationResult};
pub use playbook::{
    Comparator, ConditionField, OnFailure, Playbook, PlaybookRegistry, PlaybookStep, StepCondition,
};
