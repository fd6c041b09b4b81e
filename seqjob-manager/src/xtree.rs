//! XTree invocation builder
//!
//! XTree runs as a single command in one of two modes. The flag schema is
//! declared on the parameter structs via `#[derive(ArgSchema)]`, so flags
//! come out in field order with fixed spellings.

use serde::{Deserialize, Serialize};
use seqjob_manager_sdk::ArgSchema;
use std::fmt;
use std::path::Path;

/// Output database written by BUILD when none is given
pub const DEFAULT_OUTPUT_DB: &str = "xtree.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum XTreeMode {
    Align,
    Build,
}

impl fmt::Display for XTreeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XTreeMode::Align => f.write_str("ALIGN"),
            XTreeMode::Build => f.write_str("BUILD"),
        }
    }
}

/// Parameters submitted for an XTree job (params.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XTreeParams {
    pub mode: XTreeMode,
    #[serde(default)]
    pub global: GlobalOptions,
    #[serde(default)]
    pub align: Option<AlignOptions>,
    #[serde(default)]
    pub build: Option<BuildOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ArgSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalOptions {
    pub threads: Option<u32>,
    pub log_out: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ArgSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct AlignOptions {
    pub db: Option<String>,
    pub confidence: Option<f64>,
    #[flag(nested)]
    pub outputs: AlignOutputs,
    #[flag(nested)]
    pub algorithms: AlignAlgorithms,
    #[flag(nested)]
    pub performance: AlignPerformance,
}

/// Report files, each written under a fixed name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ArgSchema)]
#[serde(default)]
pub struct AlignOutputs {
    #[flag(name = "--perq-out", value = "per_query.tsv")]
    pub perq: bool,
    #[serde(rename = "ref")]
    #[flag(name = "--ref-out", value = "reference.tsv")]
    pub reference: bool,
    #[flag(name = "--tax-out", value = "taxonomy.tsv")]
    pub tax: bool,
    #[flag(name = "--cov-out", value = "coverage.tsv")]
    pub cov: bool,
    #[flag(name = "--orthog-out", value = "orthogonal.tsv")]
    pub orthog: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ArgSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct AlignAlgorithms {
    pub redistribute: bool,
    pub fast_redistribute: bool,
    pub shallow_lca: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ArgSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct AlignPerformance {
    #[flag(name = "--copymem")]
    pub copy_mem: bool,
    #[flag(name = "--doforage")]
    pub do_forage: bool,
    pub half_forage: bool,
    pub no_adamantium: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ArgSchema)]
#[serde(default)]
pub struct BuildOptions {
    pub comp: Option<u32>,
    pub k: Option<u32>,
}

/// Built invocation: argv plus its space-joined display form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XTreeCommand {
    pub argv: Vec<String>,
    pub command: String,
}

/// Build the XTree command line.
///
/// `<xtree> <MODE> --seqs <seq> [global] [mode options]`. BUILD always ends
/// with `--db <output_db>`.
pub fn build_xtree_command(
    xtree_path: &Path,
    seq_path: &Path,
    params: &XTreeParams,
    map_path: Option<&Path>,
    output_db: Option<&Path>,
) -> XTreeCommand {
    let mut argv = vec![
        xtree_path.display().to_string(),
        params.mode.to_string(),
        "--seqs".to_string(),
        seq_path.display().to_string(),
    ];

    params.global.append_args(&mut argv);

    match params.mode {
        XTreeMode::Align => params.align.append_args(&mut argv),
        XTreeMode::Build => {
            if let Some(map) = map_path {
                argv.push("--map".to_string());
                argv.push(map.display().to_string());
            }
            params.build.append_args(&mut argv);
            argv.push("--db".to_string());
            argv.push(
                output_db
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| DEFAULT_OUTPUT_DB.to_string()),
            );
        }
    }

    XTreeCommand {
        command: argv.join(" "),
        argv,
    }
}
