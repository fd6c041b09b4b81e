//! Submission service: validate, persist and enqueue a job
//!
//! Front-ends hand over an already validated upload and a parsed parameter
//! object. MAGUS workflows are enforced and compiled here so an empty
//! workflow is rejected before any job is created.

use serde::Serialize;
use seqjob_manager_sdk::{Tool, WorkflowStep};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::error::{PlanError, SubmitError};
use crate::magus::{self, DependencyWarning, WorkflowState};
use crate::store::{JobStore, NewJob};
use crate::xtree::XTreeParams;

/// Enforced workflow, the warnings enforcement resolved, and its steps
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MagusPlan {
    pub workflow: WorkflowState,
    pub warnings: Vec<DependencyWarning>,
    pub steps: Vec<WorkflowStep>,
}

/// Result of a successful submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReceipt {
    pub job_id: Uuid,
    pub warnings: Vec<DependencyWarning>,
    pub steps: Vec<WorkflowStep>,
}

/// Enforce dependencies and compile. Fails when nothing would run.
pub fn plan_magus(workflow: &WorkflowState) -> Result<MagusPlan, PlanError> {
    let warnings = magus::evaluate(workflow);
    let enforced = magus::enforce(workflow);
    let steps = magus::compile(&enforced);

    if steps.is_empty() {
        return Err(PlanError::NoStepsEnabled);
    }

    Ok(MagusPlan {
        workflow: enforced,
        warnings,
        steps,
    })
}

/// Create and enqueue a MAGUS job. The enforced workflow is what gets stored.
pub fn submit_magus(
    store: &JobStore,
    email: &str,
    workflow: &WorkflowState,
    input: &Path,
) -> Result<SubmitReceipt, SubmitError> {
    let plan = plan_magus(workflow)?;
    let params = to_params(Tool::Magus, &plan.workflow)?;

    let job_id = store.create_job(NewJob {
        tool: Tool::Magus,
        email: email.to_string(),
        mode: None,
        params,
        input: input.to_path_buf(),
        mapping: None,
    })?;
    store.enqueue(job_id)?;

    info!(job_id = %job_id, tool = "magus", steps = plan.steps.len(), "job submitted");
    Ok(SubmitReceipt {
        job_id,
        warnings: plan.warnings,
        steps: plan.steps,
    })
}

/// Create and enqueue an XTree job
pub fn submit_xtree(
    store: &JobStore,
    email: &str,
    params: &XTreeParams,
    input: &Path,
    mapping: Option<&Path>,
) -> Result<SubmitReceipt, SubmitError> {
    let job_id = store.create_job(NewJob {
        tool: Tool::Xtree,
        email: email.to_string(),
        mode: Some(params.mode.to_string()),
        params: to_params(Tool::Xtree, params)?,
        input: input.to_path_buf(),
        mapping: mapping.map(Path::to_path_buf),
    })?;
    store.enqueue(job_id)?;

    info!(job_id = %job_id, tool = "xtree", mode = %params.mode, "job submitted");
    Ok(SubmitReceipt {
        job_id,
        warnings: Vec::new(),
        steps: Vec::new(),
    })
}

fn to_params<T: Serialize>(tool: Tool, value: &T) -> Result<serde_json::Value, PlanError> {
    serde_json::to_value(value).map_err(|source| PlanError::Params {
        tool: tool.as_str(),
        source,
    })
}
