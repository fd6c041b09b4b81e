//! Cross-stage dependency rules for the MAGUS workflow
//!
//! Rules are advisory while a workflow is being edited (`evaluate`,
//! `intent_warning`) and binding at submission (`enforce`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::stages::{StageKey, WorkflowState};

/// `stage` may only be enabled while every stage in `requires` is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyRule {
    pub stage: StageKey,
    pub requires: &'static [StageKey],
    pub message: &'static str,
}

/// A violated rule, reported against the dependent stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyWarning {
    pub stage: StageKey,
    pub message: String,
}

pub static STAGE_DEPENDENCY_RULES: &[DependencyRule] = &[
    DependencyRule {
        stage: StageKey::Preprocessing,
        requires: &[StageKey::Input],
        message: "Read QC and preprocessing require an input FASTQ file and execution settings.",
    },
    DependencyRule {
        stage: StageKey::Assembly,
        requires: &[StageKey::Input],
        message: "Assembly requires sequencing input and execution configuration.",
    },
    DependencyRule {
        stage: StageKey::Taxonomy,
        requires: &[StageKey::Assembly],
        message: "Taxonomy requires assemblies or MAGs from the Assembly & Binning stage.",
    },
    DependencyRule {
        stage: StageKey::Specialized,
        requires: &[StageKey::Assembly],
        message: "Virus and eukaryote detection require assemblies or bins.",
    },
    DependencyRule {
        stage: StageKey::Annotation,
        requires: &[StageKey::Assembly],
        message: "Annotation requires assembled contigs or MAGs.",
    },
    DependencyRule {
        stage: StageKey::Phylogeny,
        requires: &[StageKey::Annotation],
        message: "Phylogeny requires annotated genes from the Annotation stage.",
    },
];

/// Rule declared for a stage, if any
pub fn rule_for(stage: StageKey) -> Option<&'static DependencyRule> {
    STAGE_DEPENDENCY_RULES.iter().find(|rule| rule.stage == stage)
}

fn violates(state: &WorkflowState, rule: &DependencyRule) -> bool {
    state.is_enabled(rule.stage) && rule.requires.iter().any(|req| !state.is_enabled(*req))
}

impl From<&DependencyRule> for DependencyWarning {
    fn from(rule: &DependencyRule) -> Self {
        Self {
            stage: rule.stage,
            message: rule.message.to_string(),
        }
    }
}

/// One warning per violated rule, in rule-declaration order
pub fn evaluate(state: &WorkflowState) -> Vec<DependencyWarning> {
    STAGE_DEPENDENCY_RULES
        .iter()
        .filter(|rule| violates(state, rule))
        .map(DependencyWarning::from)
        .collect()
}

/// Copy of `state` with every violating stage disabled, cascading until
/// all rules hold
pub fn enforce(state: &WorkflowState) -> WorkflowState {
    enforce_counting_passes(state).0
}

/// Returns the enforced state and the number of passes that changed it.
///
/// Each changing pass disables at least one enabled stage and nothing is
/// ever re-enabled, so at most `StageKey::ALL.len()` passes change anything.
pub(crate) fn enforce_counting_passes(state: &WorkflowState) -> (WorkflowState, usize) {
    let mut next = state.clone();
    let mut passes = 0;

    for _ in 0..=StageKey::ALL.len() {
        let mut changed = false;

        for rule in STAGE_DEPENDENCY_RULES {
            if violates(&next, rule) {
                next.set_enabled(rule.stage, false);
                changed = true;
            }
        }

        if !changed {
            break;
        }
        passes += 1;
    }

    (next, passes)
}

/// Warning for the stage the user just toggled, when any stage it requires
/// is disabled. The toggled stage's own state is ignored, so the message
/// survives `enforce` switching it back off. At most one entry.
pub fn intent_warning(
    state: &WorkflowState,
    last_toggled: Option<StageKey>,
) -> Vec<DependencyWarning> {
    let Some(stage) = last_toggled else {
        return Vec::new();
    };

    rule_for(stage)
        .filter(|rule| rule.requires.iter().any(|req| !state.is_enabled(*req)))
        .map(DependencyWarning::from)
        .into_iter()
        .collect()
}

/// Group warning messages under their stage
pub fn group_warnings_by_stage(warnings: &[DependencyWarning]) -> BTreeMap<StageKey, Vec<String>> {
    let mut grouped: BTreeMap<StageKey, Vec<String>> = BTreeMap::new();
    for warning in warnings {
        grouped
            .entry(warning.stage)
            .or_default()
            .push(warning.message.clone());
    }
    grouped
}
