use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use ims_core::cache::CACHE_KEY_PREFIX;
use ims_core::chunk;
use ims_core::steps;
use ims_core::{
    load_ims_config, AnalysisContext, AnalysisPipeline, HttpInferenceClient, ImsConfig, Ledger,
    MetadataStore, ObjectRef, PipelineReport, ProxyStage, RunContext, SqliteMetadataStore,
    SqliteTableStore, StepOutcome, TableStore,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ims_core::ConfigError),
    #[error("metadata store error: {0}")]
    Metadata(#[from] ims_core::MetadataError),
    #[error("ledger error: {0}")]
    Ledger(#[from] ims_core::LedgerError),
    #[error("table store error: {0}")]
    Table(#[from] ims_core::TableError),
    #[error("inference client error: {0}")]
    Inference(#[from] ims_core::InferenceError),
    #[error("{0}")]
    Pipeline(#[from] ims_core::PipelineError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable media analysis pipeline", long_about = None)]
pub struct Cli {
    /// Path of ims.toml
    #[arg(long, env = "IMS_CONFIG", default_value = "configs/ims.toml")]
    pub config: PathBuf,
    /// Input object as bucket/object
    #[arg(long, env = "INPUT_FILE")]
    pub input_file: Option<String>,
    /// Overrides pipeline.mount_point
    #[arg(long, env = "MOUNT_POINT")]
    pub mount_point: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs every analysis stage that has not completed yet
    Analyze,
    /// Generates the low-resolution proxy of the input
    Proxy,
    /// Shows the ledger of the input object
    Status,
    /// Prints the chunk plan for a duration
    Chunks(ChunksArgs),
    /// Prints shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct ChunksArgs {
    /// Media duration in seconds
    #[arg(long)]
    pub duration: u64,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "imsctl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    if let Commands::Chunks(args) = &cli.command {
        return render(&context.chunk_plan(args.duration), cli.format);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        match &cli.command {
            Commands::Analyze => render(&context.analyze().await?, cli.format),
            Commands::Proxy => render(&context.proxy().await?, cli.format),
            Commands::Status => render(&context.status().await?, cli.format),
            Commands::Chunks(_) | Commands::Completions(_) => Ok(()),
        }
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: Arc<ImsConfig>,
    metadata_db: PathBuf,
    table_db: PathBuf,
    input_file: Option<String>,
    mount_point: Option<PathBuf>,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_ims_config(&cli.config)?;
        let config_dir = cli
            .config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let metadata_db = ImsConfig::resolve_path(&config_dir, &config.storage.metadata_db);
        let table_db = ImsConfig::resolve_path(&config_dir, &config.storage.table_db);

        Ok(Self {
            config: Arc::new(config),
            metadata_db,
            table_db,
            input_file: cli.input_file.clone(),
            mount_point: cli.mount_point.clone(),
        })
    }

    fn object(&self) -> Result<ObjectRef> {
        Ok(ObjectRef::parse(self.input_file.as_deref().unwrap_or_default())?)
    }

    fn run_context(&self) -> Result<RunContext> {
        let run = RunContext::new(self.object()?, self.config.clone());
        Ok(match &self.mount_point {
            Some(mount_point) => run.with_mount_point(mount_point),
            None => run,
        })
    }

    fn metadata_store(&self) -> Result<SqliteMetadataStore> {
        ensure_parent(&self.metadata_db)?;
        let store = SqliteMetadataStore::builder()
            .path(&self.metadata_db)
            .create_if_missing(true)
            .build()?;
        store.initialize()?;
        Ok(store)
    }

    fn table_store(&self) -> Result<SqliteTableStore> {
        ensure_parent(&self.table_db)?;
        let store = SqliteTableStore::builder()
            .path(&self.table_db)
            .create_if_missing(true)
            .build()?;
        store.initialize()?;
        Ok(store)
    }

    async fn analyze(&self) -> Result<PipelineReport> {
        let run = self.run_context()?;
        let inference = HttpInferenceClient::new(
            &self.config.inference.endpoint,
            Duration::from_secs(self.config.inference.timeout_secs),
        )?;
        let metadata: Arc<dyn MetadataStore> = Arc::new(self.metadata_store()?);
        let tables: Arc<dyn TableStore> = Arc::new(self.table_store()?);
        let ctx = AnalysisContext::new(run, metadata, Arc::new(inference), tables);
        let pipeline = AnalysisPipeline::new(ctx)?;
        Ok(pipeline.run().await?)
    }

    async fn proxy(&self) -> Result<ProxyReport> {
        let run = self.run_context()?;
        let ledger = Ledger::new(Arc::new(self.metadata_store()?), run.object.clone());
        let outcome = ProxyStage::from_run(&run).run(&run, &ledger).await?;
        let skipped = outcome.was_skipped();
        let output = match outcome {
            StepOutcome::Completed { output } => output,
            StepOutcome::Skipped => ledger
                .status(steps::GENERATE_PROXY)
                .await?
                .map(|status| status.output)
                .unwrap_or_default(),
        };
        info!(object = %run.object, output = %output, "proxy available");
        Ok(ProxyReport {
            object: run.object.to_string(),
            skipped,
            output,
        })
    }

    async fn status(&self) -> Result<StatusReport> {
        let object = self.object()?;
        let ledger = Ledger::new(Arc::new(self.metadata_store()?), object.clone());
        let entries = ledger.entries().await?;

        let step_entries = std::iter::once(steps::GENERATE_PROXY)
            .chain(steps::ANALYSIS_STEPS)
            .map(|step| {
                let status = entries.get(step);
                StepEntry {
                    step: step.to_string(),
                    state: status
                        .map(|status| status.state().to_string())
                        .unwrap_or_else(|| "absent".to_string()),
                    output: status
                        .filter(|status| status.is_completed())
                        .map(|status| status.output.clone()),
                }
            })
            .collect();
        // Parameterised keys end in numbers: `_{sequence}` or `_{start}_{end}`.
        let completed = |prefix: &str| {
            entries
                .iter()
                .filter(|(key, status)| {
                    status.is_completed()
                        && key.strip_prefix(prefix).is_some_and(|suffix| {
                            !suffix.is_empty()
                                && suffix.split('_').all(|part| part.parse::<u64>().is_ok())
                        })
                })
                .count()
        };
        let content_caches = entries
            .iter()
            .filter(|(key, status)| key.starts_with(CACHE_KEY_PREFIX) && status.is_completed())
            .count();

        Ok(StatusReport {
            object: object.to_string(),
            generated_at: Utc::now(),
            steps: step_entries,
            segment_summaries_completed: completed(steps::SEGMENT_SUMMARY_PREFIX),
            chunk_summaries_completed: completed(&format!("{}_", steps::CONTENT_SUMMARY)),
            content_caches,
        })
    }

    fn chunk_plan(&self, duration_secs: u64) -> ChunkPlanReport {
        let chunking = &self.config.chunking;
        let chunked =
            chunk::should_chunk(duration_secs, chunking.chunk_length_secs, chunking.min_tail_secs);
        let windows = if chunked {
            chunk::plan(duration_secs, chunking.chunk_length_secs, chunking.min_tail_secs)
                .into_iter()
                .map(|window| ChunkEntry {
                    index: window.index,
                    step_id: window.step_id(),
                    start_secs: window.start_secs,
                    end_secs: window.end_secs,
                })
                .collect()
        } else {
            Vec::new()
        };
        ChunkPlanReport {
            duration_secs,
            chunked,
            windows,
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ProxyReport {
    pub object: String,
    pub skipped: bool,
    pub output: String,
}

impl DisplayFallback for ProxyReport {
    fn display(&self) -> String {
        let verb = if self.skipped { "already at" } else { "written to" };
        format!("{}: proxy {verb} {}", self.object, self.output)
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub object: String,
    pub generated_at: DateTime<Utc>,
    pub steps: Vec<StepEntry>,
    pub segment_summaries_completed: usize,
    pub chunk_summaries_completed: usize,
    pub content_caches: usize,
}

#[derive(Debug, Serialize)]
pub struct StepEntry {
    pub step: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Object: {}", self.object)];
        for entry in &self.steps {
            let output = entry
                .output
                .as_deref()
                .map(|output| format!(" | {}", preview(output)))
                .unwrap_or_default();
            lines.push(format!("  - {}: {}{}", entry.step, entry.state, output));
        }
        lines.push(format!(
            "Segment summaries: {} | chunk summaries: {} | content caches: {}",
            self.segment_summaries_completed, self.chunk_summaries_completed, self.content_caches
        ));
        lines.join("\n")
    }
}

fn preview(output: &str) -> String {
    const LIMIT: usize = 60;
    let line = output.lines().next().unwrap_or_default();
    if line.chars().count() > LIMIT {
        format!("{}...", line.chars().take(LIMIT).collect::<String>())
    } else {
        line.to_string()
    }
}

impl DisplayFallback for PipelineReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Object: {}", self.object)];
        for stage in &self.stages {
            let state = if stage.skipped { "skipped" } else { "completed" };
            lines.push(format!("  - {}: {state}", stage.step));
        }
        lines.push(format!(
            "Tokens: {} in, {} out, {} retries",
            self.usage.input_tokens, self.usage.output_tokens, self.usage.retries
        ));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ChunkPlanReport {
    pub duration_secs: u64,
    pub chunked: bool,
    pub windows: Vec<ChunkEntry>,
}

#[derive(Debug, Serialize)]
pub struct ChunkEntry {
    pub index: usize,
    pub step_id: String,
    pub start_secs: u64,
    pub end_secs: u64,
}

impl DisplayFallback for ChunkPlanReport {
    fn display(&self) -> String {
        if !self.chunked {
            return format!("{}s: summarised whole, no chunks", self.duration_secs);
        }
        let mut lines = vec![format!("{}s in {} chunks", self.duration_secs, self.windows.len())];
        for window in &self.windows {
            lines.push(format!(
                "#{} {}..{} ({})",
                window.index, window.start_secs, window.end_secs, window.step_id
            ));
        }
        lines.join("\n")
    }
}
