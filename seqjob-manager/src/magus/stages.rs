//! MAGUS workflow state: stage keys, per-stage typed configuration and presets
//!
//! A workflow document is a JSON/YAML object with one entry per stage:
//!
//! ```yaml
//! input:
//!   enabled: true
//!   config: { mode: local, seqtype: short }
//! assembly:
//!   enabled: true
//!   config:
//!     strategy: single
//!     binning: { enabled: true, quality_preset: medium }
//!     resources: { threads: 14, max_workers: 4 }
//! ```
//!
//! Missing stages deserialize as disabled, and missing nested sections
//! deserialize with `enabled: false`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline stage, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKey {
    Input,
    Preprocessing,
    Assembly,
    Taxonomy,
    Specialized,
    Annotation,
    Phylogeny,
}

impl StageKey {
    pub const ALL: [StageKey; 7] = [
        StageKey::Input,
        StageKey::Preprocessing,
        StageKey::Assembly,
        StageKey::Taxonomy,
        StageKey::Specialized,
        StageKey::Annotation,
        StageKey::Phylogeny,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::Input => "input",
            StageKey::Preprocessing => "preprocessing",
            StageKey::Assembly => "assembly",
            StageKey::Taxonomy => "taxonomy",
            StageKey::Specialized => "specialized",
            StageKey::Annotation => "annotation",
            StageKey::Phylogeny => "phylogeny",
        }
    }

    /// Human-readable stage title
    pub fn title(&self) -> &'static str {
        match self {
            StageKey::Input => "Input & Execution",
            StageKey::Preprocessing => "Read QC & Preprocessing",
            StageKey::Assembly => "Assembly & Binning",
            StageKey::Taxonomy => "Taxonomy & Filtering",
            StageKey::Specialized => "Specialized Analyses",
            StageKey::Annotation => "Annotation & Gene Catalogs",
            StageKey::Phylogeny => "Phylogeny & Final Outputs",
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKey::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Toggle plus typed configuration for one stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState<C> {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub config: C,
}

impl<C> StageState<C> {
    pub fn enabled(config: C) -> Self {
        Self {
            enabled: true,
            config,
        }
    }
}

/// Stage-wide resources appended to every step of the stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub threads: Option<u32>,
    pub max_workers: Option<u32>,
}

/// Sub-step with nothing but a switch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toggle {
    pub enabled: bool,
}

impl Toggle {
    pub fn on() -> Self {
        Self { enabled: true }
    }
}

// ---------------------------------------------------------------------------
// Stage 1: input & execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub mode: Option<String>,
    pub seqtype: Option<String>,
    pub threads: Option<u32>,
    pub max_workers: Option<u32>,
    pub has_slurm_config: bool,
}

// ---------------------------------------------------------------------------
// Stage 2: preprocessing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub qc: Toggle,
    pub subsample: SubsampleConfig,
    pub filter: ReadFilterConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsampleConfig {
    pub enabled: bool,
    pub depth: Option<u64>,
    pub threads: Option<u32>,
    pub max_workers: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadFilterConfig {
    pub enabled: bool,
    pub min_kmers: Option<u32>,
    pub threads: Option<u32>,
    pub max_workers: Option<u32>,
}

// ---------------------------------------------------------------------------
// Stage 3: assembly & binning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssemblyStrategy {
    Single,
    Coassembly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    Medium,
    High,
    Custom,
}

/// Stage an interrupted assembly run resumes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartStage {
    Binning,
    Checkm,
    Filtering,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub strategy: Option<AssemblyStrategy>,
    pub binning: BinningConfig,
    pub cluster_contigs: Toggle,
    pub resources: Resources,
    pub restart: Option<RestartStage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    pub enabled: bool,
    pub quality_preset: Option<QualityPreset>,
    pub completeness: Option<u32>,
    pub contamination: Option<u32>,
    pub test_mode: bool,
}

// ---------------------------------------------------------------------------
// Stage 4: taxonomy & filtering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyConfig {
    pub taxonomy: TaxonomySection,
    pub filter_mags: FilterMagsConfig,
    pub resources: Resources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomySection {
    pub enabled: bool,
    pub db: Option<String>,
    pub coverage_cutoff: Option<f64>,
    pub skip_outputs: SkipOutputs,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipOutputs {
    pub perq: bool,
    pub coverage: bool,
    pub reference: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterMagsConfig {
    pub enabled: bool,
    pub kmer_threshold: Option<u32>,
}

// ---------------------------------------------------------------------------
// Stage 5: specialized analyses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecializedConfig {
    pub viruses: VirusConfig,
    pub eukaryotes: EukaryoteConfig,
    pub dereplication: DereplicationConfig,
    pub resources: Resources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirusConfig {
    pub enabled: bool,
    pub min_length: Option<u32>,
    pub quality: Option<String>,
    pub has_checkv_db: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EukaryoteConfig {
    pub enabled: bool,
    pub size_threshold: Option<u64>,
    pub skip_eukrep: bool,
    pub skip_eukcc: bool,
    pub has_eukcc_db: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DereplicationConfig {
    pub enabled: bool,
    pub kmer_size: Option<u32>,
}

// ---------------------------------------------------------------------------
// Stage 6: annotation & gene catalogs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HmmMode {
    Default,
    Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub orf_calling: OrfCallingConfig,
    pub annotation: AnnotateConfig,
    pub gene_catalog: GeneCatalogConfig,
    pub resources: Resources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrfCallingConfig {
    pub enabled: bool,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    pub enabled: bool,
    pub domains: Vec<String>,
    pub mode: Option<HmmMode>,
    pub evalue_full: Option<f64>,
    pub evalue_dom: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneCatalogConfig {
    pub enabled: bool,
    pub identity_threshold: Option<f64>,
    pub coverage_threshold: Option<f64>,
}

// ---------------------------------------------------------------------------
// Stage 7: phylogeny & final outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhylogenyConfig {
    pub phylogeny: TreeConfig,
    pub finalize_mags: Toggle,
    pub resources: Resources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub enabled: bool,
    pub iqtree: bool,
    pub coverage_threshold: Option<f64>,
    pub evalue_cutoff: Option<f64>,
    pub trimal_cutoff: Option<f64>,
}

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

/// Complete stage selection; every stage is always present
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowState {
    pub input: StageState<InputConfig>,
    pub preprocessing: StageState<PreprocessingConfig>,
    pub assembly: StageState<AssemblyConfig>,
    pub taxonomy: StageState<TaxonomyConfig>,
    pub specialized: StageState<SpecializedConfig>,
    pub annotation: StageState<AnnotationConfig>,
    pub phylogeny: StageState<PhylogenyConfig>,
}

impl WorkflowState {
    pub fn is_enabled(&self, stage: StageKey) -> bool {
        match stage {
            StageKey::Input => self.input.enabled,
            StageKey::Preprocessing => self.preprocessing.enabled,
            StageKey::Assembly => self.assembly.enabled,
            StageKey::Taxonomy => self.taxonomy.enabled,
            StageKey::Specialized => self.specialized.enabled,
            StageKey::Annotation => self.annotation.enabled,
            StageKey::Phylogeny => self.phylogeny.enabled,
        }
    }

    pub fn set_enabled(&mut self, stage: StageKey, enabled: bool) {
        let flag = match stage {
            StageKey::Input => &mut self.input.enabled,
            StageKey::Preprocessing => &mut self.preprocessing.enabled,
            StageKey::Assembly => &mut self.assembly.enabled,
            StageKey::Taxonomy => &mut self.taxonomy.enabled,
            StageKey::Specialized => &mut self.specialized.enabled,
            StageKey::Annotation => &mut self.annotation.enabled,
            StageKey::Phylogeny => &mut self.phylogeny.enabled,
        };
        *flag = enabled;
    }

    /// Flip a stage and return its new value
    pub fn toggle(&mut self, stage: StageKey) -> bool {
        let next = !self.is_enabled(stage);
        self.set_enabled(stage, next);
        next
    }

    pub fn enabled_stages(&self) -> Vec<StageKey> {
        StageKey::ALL
            .into_iter()
            .filter(|stage| self.is_enabled(*stage))
            .collect()
    }

    /// Ready-made selection for one of the named presets
    pub fn from_preset(preset: Preset) -> Self {
        let mut state = Self {
            input: StageState::enabled(InputConfig {
                mode: Some("local".to_string()),
                seqtype: Some("short".to_string()),
                threads: Some(14),
                max_workers: Some(4),
                has_slurm_config: false,
            }),
            preprocessing: StageState::enabled(PreprocessingConfig {
                qc: Toggle::on(),
                subsample: SubsampleConfig {
                    enabled: true,
                    depth: Some(DEFAULT_SUBSAMPLE_DEPTH),
                    threads: None,
                    max_workers: None,
                },
                filter: ReadFilterConfig::default(),
            }),
            assembly: StageState::enabled(AssemblyConfig {
                strategy: Some(AssemblyStrategy::Single),
                binning: BinningConfig {
                    enabled: true,
                    quality_preset: Some(QualityPreset::Medium),
                    completeness: Some(50),
                    contamination: Some(10),
                    test_mode: false,
                },
                cluster_contigs: Toggle::default(),
                resources: default_resources(),
                restart: None,
            }),
            taxonomy: StageState::enabled(TaxonomyConfig {
                taxonomy: TaxonomySection {
                    enabled: true,
                    ..Default::default()
                },
                filter_mags: FilterMagsConfig::default(),
                resources: default_resources(),
            }),
            specialized: StageState::enabled(SpecializedConfig {
                viruses: VirusConfig::default(),
                eukaryotes: EukaryoteConfig {
                    enabled: true,
                    ..Default::default()
                },
                dereplication: DereplicationConfig::default(),
                resources: default_resources(),
            }),
            annotation: StageState::default(),
            phylogeny: StageState::default(),
        };

        match preset {
            Preset::EukaryoteDominant => {}
            Preset::Balanced => {
                state.specialized.config.viruses.enabled = true;
                state.annotation = StageState::enabled(AnnotationConfig {
                    orf_calling: OrfCallingConfig {
                        enabled: true,
                        domain: Some("all".to_string()),
                    },
                    annotation: AnnotateConfig {
                        enabled: true,
                        domains: vec!["bacteria".to_string(), "eukaryota".to_string()],
                        mode: Some(HmmMode::Default),
                        ..Default::default()
                    },
                    gene_catalog: GeneCatalogConfig::default(),
                    resources: default_resources(),
                });
            }
            Preset::BacteriaFocused => {
                state.specialized.config.eukaryotes.enabled = false;
                state.specialized.config.dereplication.enabled = true;
                state.taxonomy.config.filter_mags.enabled = true;
                state.annotation = StageState::enabled(AnnotationConfig {
                    orf_calling: OrfCallingConfig {
                        enabled: true,
                        domain: Some("bacteria".to_string()),
                    },
                    annotation: AnnotateConfig {
                        enabled: true,
                        domains: vec!["bacteria".to_string()],
                        mode: Some(HmmMode::Default),
                        ..Default::default()
                    },
                    gene_catalog: GeneCatalogConfig::default(),
                    resources: default_resources(),
                });
                state.phylogeny = StageState::enabled(PhylogenyConfig {
                    phylogeny: TreeConfig {
                        enabled: true,
                        ..Default::default()
                    },
                    finalize_mags: Toggle::on(),
                    resources: Resources {
                        threads: Some(14),
                        max_workers: None,
                    },
                });
            }
        }

        state
    }
}

/// First-pass assembly subsampling depth, in reads
pub const DEFAULT_SUBSAMPLE_DEPTH: u64 = 100_000_000;

fn default_resources() -> Resources {
    Resources {
        threads: Some(14),
        max_workers: Some(4),
    }
}

/// Named workflow presets offered by the submission form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    #[default]
    EukaryoteDominant,
    Balanced,
    BacteriaFocused,
}

impl Preset {
    pub const ALL: [Preset; 3] = [
        Preset::EukaryoteDominant,
        Preset::Balanced,
        Preset::BacteriaFocused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::EukaryoteDominant => "eukaryote-dominant",
            Preset::Balanced => "balanced",
            Preset::BacteriaFocused => "bacteria-focused",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Preset::EukaryoteDominant => "Eukaryote-dominant community",
            Preset::Balanced => "Balanced multi-domain community",
            Preset::BacteriaFocused => "Bacteria-focused analysis",
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.as_str() == s)
            .ok_or_else(|| format!("unknown preset '{}'", s))
    }
}
