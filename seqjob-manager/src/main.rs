use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use seqjob_manager::command::build_command;
use seqjob_manager::magus::{
    compile, enforce, group_warnings_by_stage, Preset, StageKey, WorkflowState,
};
use seqjob_manager::submit::{plan_magus, submit_magus, submit_xtree, SubmitReceipt};
use seqjob_manager::xtree::{AlignOptions, BuildOptions, GlobalOptions, XTreeParams};
use seqjob_manager::{ExecutionMode, JobStore, Worker, WorkerConfig};
use seqjob_manager_sdk::{
    log_found, log_info, log_success, log_warning, ArgSchema, JobStatus,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "seqjob")]
#[command(about = "Sequential job manager for the MAGUS and XTree bioinformatics tools")]
struct Cli {
    /// Job store directory (overrides SEQJOB_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the single-consumer worker until Ctrl-C
    Worker {
        /// Simulate steps instead of launching the real binaries
        #[arg(long, action = clap::ArgAction::SetTrue)]
        stub: bool,

        /// Process at most one job, then exit
        #[arg(long, action = clap::ArgAction::SetTrue)]
        once: bool,
    },

    /// Create and enqueue a job
    Submit {
        #[command(subcommand)]
        tool: SubmitTool,
    },

    /// Show dependency warnings and the commands a workflow would run
    Plan {
        #[command(flatten)]
        workflow: WorkflowArgs,
    },

    /// Show a job's status
    Status {
        job_id: Uuid,

        /// Also print the captured transcript
        #[arg(long, action = clap::ArgAction::SetTrue)]
        transcript: bool,
    },

    /// List queued job ids in execution order
    Queue,

    /// List every job in the store
    Jobs,

    /// List the MAGUS workflow presets
    Presets,

    /// Print the XTree flag schema as JSON
    XtreeFlags,

    /// Remove one job, or every job older than the retention window
    Purge {
        job_id: Option<Uuid>,

        /// Retention window in days (defaults to SEQJOB_RETENTION_DAYS or 7)
        #[arg(long)]
        older_than_days: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum SubmitTool {
    /// Submit a MAGUS workflow
    Magus {
        #[arg(short, long)]
        email: String,

        /// Uploaded sequence file
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        workflow: WorkflowArgs,
    },

    /// Submit an XTree ALIGN or BUILD job
    Xtree {
        #[arg(short, long)]
        email: String,

        /// Uploaded sequence file
        #[arg(short, long)]
        input: PathBuf,

        /// Parameter object as YAML or JSON
        #[arg(short, long)]
        params: PathBuf,

        /// Taxonomy mapping file (BUILD mode)
        #[arg(short, long)]
        mapping: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct WorkflowArgs {
    /// Workflow state as YAML or JSON
    #[arg(short, long, conflicts_with = "preset")]
    workflow: Option<PathBuf>,

    /// Start from a preset (eukaryote-dominant, balanced, bacteria-focused)
    #[arg(long)]
    preset: Option<Preset>,

    /// Enable a stage on top of the loaded workflow
    #[arg(long = "enable")]
    enable: Vec<StageKey>,

    /// Disable a stage on top of the loaded workflow
    #[arg(long = "disable")]
    disable: Vec<StageKey>,
}

impl WorkflowArgs {
    fn resolve(&self) -> Result<WorkflowState> {
        let mut state = match (&self.workflow, self.preset) {
            (Some(path), _) => read_document::<WorkflowState>(path)?,
            (None, Some(preset)) => WorkflowState::from_preset(preset),
            (None, None) => WorkflowState::from_preset(Preset::default()),
        };
        for stage in &self.enable {
            state.set_enabled(*stage, true);
        }
        for stage in &self.disable {
            state.set_enabled(*stage, false);
        }
        Ok(state)
    }
}

/// YAML is a superset of JSON, so one parser covers both formats
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = WorkerConfig::from_env()?;
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    match cli.command {
        Commands::Worker { stub, once } => {
            if stub {
                config = config.with_mode(ExecutionMode::Stub);
            }
            run_worker(config, once).await
        }
        Commands::Submit { tool } => {
            let store = JobStore::open(&config.data_dir)?;
            let receipt = match tool {
                SubmitTool::Magus {
                    email,
                    input,
                    workflow,
                } => submit_magus(&store, &email, &workflow.resolve()?, &input)?,
                SubmitTool::Xtree {
                    email,
                    input,
                    params,
                    mapping,
                } => {
                    let params: XTreeParams = read_document(&params)?;
                    submit_xtree(&store, &email, &params, &input, mapping.as_deref())?
                }
            };
            print_receipt(&receipt);
            Ok(())
        }
        Commands::Plan { workflow } => {
            let plan = plan_magus(&workflow.resolve()?)?;
            for (stage, messages) in group_warnings_by_stage(&plan.warnings) {
                for message in messages {
                    log_warning!("[{}] {}", stage.title(), message);
                }
            }
            log_found!(plan.steps.len(), "steps");
            for step in &plan.steps {
                println!("  {}", build_command(step).join(" "));
            }
            Ok(())
        }
        Commands::Status { job_id, transcript } => {
            let store = JobStore::open(&config.data_dir)?;
            let meta = store.load_meta(job_id)?;
            let status = store.load_status(job_id)?;

            log_info!("{} job {} for {}", meta.tool, meta.id, meta.email);
            println!("{}", serde_json::to_string_pretty(&status)?);

            if transcript {
                match store.read_transcript(job_id)? {
                    Some(text) => println!("{}", text),
                    None => log_info!("no transcript yet"),
                }
            }
            Ok(())
        }
        Commands::Queue => {
            let store = JobStore::open(&config.data_dir)?;
            let ids = store.queued_ids()?;
            log_found!(ids.len(), "queued jobs");
            for id in ids {
                println!("  {}", id);
            }
            Ok(())
        }
        Commands::Jobs => {
            let store = JobStore::open(&config.data_dir)?;
            let jobs = store.list_jobs()?;
            log_found!(jobs.len(), "jobs");
            for job in jobs {
                println!(
                    "  {}  {:<6} {:<7} {}",
                    job.meta.id,
                    job.meta.tool,
                    job.status.label(),
                    job.meta.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        Commands::Presets => {
            for preset in Preset::ALL {
                let steps = compile(&enforce(&WorkflowState::from_preset(preset)));
                println!(
                    "  {:<20} {} ({} steps)",
                    preset.as_str(),
                    preset.description(),
                    steps.len()
                );
            }
            Ok(())
        }
        Commands::XtreeFlags => {
            let schema = serde_json::json!({
                "global": GlobalOptions::arg_fields(),
                "align": AlignOptions::arg_fields(),
                "build": BuildOptions::arg_fields(),
            });
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Commands::Purge {
            job_id,
            older_than_days,
        } => {
            if let Some(days) = older_than_days {
                config = config.with_retention(Duration::from_secs(days * 24 * 60 * 60));
            }
            match job_id {
                Some(id) => {
                    let store = JobStore::open(&config.data_dir)?;
                    if matches!(store.load_status(id)?, JobStatus::Running { .. }) {
                        bail!("job {} is running", id);
                    }
                    store.purge(id)?;
                    log_success!("Purged job {}", id);
                }
                None => {
                    let worker = Worker::from_config(config)?;
                    let purged = worker.sweep()?;
                    log_success!("Purged {} expired jobs", purged);
                }
            }
            Ok(())
        }
    }
}

async fn run_worker(config: WorkerConfig, once: bool) -> Result<()> {
    config.validate()?;
    let mut worker = Worker::from_config(config)?;

    let recovery = worker.recover()?;
    if recovery.lock_cleared {
        info!("cleared stale execution lock");
    }
    if !recovery.failed_jobs.is_empty() {
        log_warning!("{} orphaned jobs marked as failed", recovery.failed_jobs.len());
    }

    if once {
        let tick = worker.run_once().await?;
        log_info!("{:?}", tick);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, finishing current job");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await
}

fn print_receipt(receipt: &SubmitReceipt) {
    for warning in &receipt.warnings {
        log_warning!("[{}] {}", warning.stage.title(), warning.message);
    }
    if !receipt.steps.is_empty() {
        log_found!(receipt.steps.len(), "steps");
    }
    log_success!("Queued job {}", receipt.job_id);
}
