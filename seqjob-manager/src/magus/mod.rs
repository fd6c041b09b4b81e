//! MAGUS workflow module
//!
//! Stage selection, cross-stage dependency enforcement and compilation of a
//! selection into an ordered list of `magus <subcommand>` steps.

pub mod compile;
pub mod dependencies;
pub mod stages;

// Re-export commonly used types
pub use compile::{compile, MAGUS_COMMAND};
pub use dependencies::{
    enforce, evaluate, group_warnings_by_stage, intent_warning, DependencyRule,
    DependencyWarning, STAGE_DEPENDENCY_RULES,
};
pub use stages::{Preset, StageKey, StageState, WorkflowState};
