//! Workflow compiler: stage selection -> ordered execution plan
//!
//! Pure and infallible. Stages contribute steps in declaration order and
//! each stage orders its own sub-steps. A sub-step runs only when its
//! section is enabled, so partial configuration yields fewer steps rather
//! than an error.

use serde::Serialize;
use serde_json::{Map, Value};
use seqjob_manager_sdk::WorkflowStep;

use super::stages::{AssemblyStrategy, Resources, StageKey, WorkflowState};

/// Executable name every MAGUS step command starts with
pub const MAGUS_COMMAND: &str = "magus";

/// Compile a MAGUS workflow into an ordered list of steps
pub fn compile(state: &WorkflowState) -> Vec<WorkflowStep> {
    let mut steps = Vec::new();

    // Stage 1: input contributes no execution step

    // Stage 2: preprocessing
    if state.preprocessing.enabled {
        let cfg = &state.preprocessing.config;
        if cfg.qc.enabled {
            steps.push(step("qc", StageKey::Preprocessing, section_args(cfg, None)));
        }
    }

    // Stage 3: assembly & binning
    if state.assembly.enabled {
        let cfg = &state.assembly.config;
        let resources = Some(&cfg.resources);
        let assembly_args = || {
            let mut args = Map::new();
            if let Some(restart) = cfg.restart {
                args.insert("restart".to_string(), to_value(&restart));
            }
            append_resources(&mut args, resources);
            args
        };

        if cfg.strategy == Some(AssemblyStrategy::Single) {
            steps.push(step("single-assembly", StageKey::Assembly, assembly_args()));
            if cfg.binning.enabled {
                steps.push(step(
                    "binning",
                    StageKey::Assembly,
                    section_args(&cfg.binning, resources),
                ));
            }
        }

        if cfg.cluster_contigs.enabled {
            steps.push(step(
                "cluster-contigs",
                StageKey::Assembly,
                section_args(&cfg.cluster_contigs, resources),
            ));
        }

        if cfg.strategy == Some(AssemblyStrategy::Coassembly) {
            steps.push(step("coassembly", StageKey::Assembly, assembly_args()));
            if cfg.binning.enabled {
                steps.push(step(
                    "coassembly-binning",
                    StageKey::Assembly,
                    section_args(&cfg.binning, resources),
                ));
            }
        }
    }

    // Stage 4: taxonomy & filtering
    if state.taxonomy.enabled {
        let cfg = &state.taxonomy.config;
        let resources = Some(&cfg.resources);
        if cfg.taxonomy.enabled {
            steps.push(step(
                "taxonomy",
                StageKey::Taxonomy,
                section_args(&cfg.taxonomy, resources),
            ));
        }
        if cfg.filter_mags.enabled {
            steps.push(step(
                "filter-mags",
                StageKey::Taxonomy,
                section_args(&cfg.filter_mags, resources),
            ));
        }
    }

    // Stage 5: specialized analyses
    if state.specialized.enabled {
        let cfg = &state.specialized.config;
        let resources = Some(&cfg.resources);
        if cfg.viruses.enabled {
            steps.push(step(
                "find-viruses",
                StageKey::Specialized,
                section_args(&cfg.viruses, resources),
            ));
        }
        if cfg.eukaryotes.enabled {
            steps.push(step(
                "find-euks",
                StageKey::Specialized,
                section_args(&cfg.eukaryotes, resources),
            ));
        }
        if cfg.dereplication.enabled {
            steps.push(step(
                "dereplicate",
                StageKey::Specialized,
                section_args(&cfg.dereplication, resources),
            ));
        }
    }

    // Stage 6: annotation & gene catalogs
    if state.annotation.enabled {
        let cfg = &state.annotation.config;
        let resources = Some(&cfg.resources);
        if cfg.orf_calling.enabled {
            steps.push(step(
                "call-orfs",
                StageKey::Annotation,
                section_args(&cfg.orf_calling, resources),
            ));
        }
        if cfg.annotation.enabled {
            steps.push(step(
                "annotate",
                StageKey::Annotation,
                section_args(&cfg.annotation, resources),
            ));
        }
        if cfg.gene_catalog.enabled {
            steps.push(step(
                "build-gene-catalog",
                StageKey::Annotation,
                section_args(&cfg.gene_catalog, resources),
            ));
            steps.push(step(
                "consolidate-gene-catalog",
                StageKey::Annotation,
                section_args(&cfg.gene_catalog, resources),
            ));
        }
    }

    // Stage 7: phylogeny & final outputs
    if state.phylogeny.enabled {
        let cfg = &state.phylogeny.config;
        let resources = Some(&cfg.resources);
        if cfg.phylogeny.enabled {
            steps.push(step(
                "build-tree",
                StageKey::Phylogeny,
                section_args(&cfg.phylogeny, resources),
            ));
        }
        if cfg.finalize_mags.enabled {
            steps.push(step(
                "finalize-bacterial-mags",
                StageKey::Phylogeny,
                section_args(&cfg.finalize_mags, resources),
            ));
        }
    }

    steps
}

fn step(id: &str, stage: StageKey, args: Map<String, Value>) -> WorkflowStep {
    WorkflowStep {
        id: id.to_string(),
        stage: stage.as_str().to_string(),
        command: format!("{} {}", MAGUS_COMMAND, id),
        args,
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Section fields in declaration order, then the stage resources
fn section_args<T: Serialize>(section: &T, resources: Option<&Resources>) -> Map<String, Value> {
    let mut args = match to_value(section) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    append_resources(&mut args, resources);
    args
}

fn append_resources(args: &mut Map<String, Value>, resources: Option<&Resources>) {
    let Some(resources) = resources else {
        return;
    };
    if let Some(threads) = resources.threads {
        args.insert("threads".to_string(), Value::from(threads));
    }
    if let Some(max_workers) = resources.max_workers {
        args.insert("max_workers".to_string(), Value::from(max_workers));
    }
}
