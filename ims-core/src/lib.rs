pub mod cache;
pub mod chunk;
pub mod config;
pub mod error;
pub mod fanout;
pub mod inference;
pub mod ledger;
pub mod media;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod probe;
pub mod sqlite;
pub mod steps;
pub mod table;
pub mod templates;

pub use cache::{cache_key, CacheError, ContentCacheManager, SystemInstruction};
pub use chunk::{ChunkError, ChunkWindow, ChunkingConfig, SummaryScope};
pub use config::{load_ims_config, ImsConfig};
pub use error::{ConfigError, Result};
pub use fanout::{FanOutConfig, FanOutError, FanOutExecutor, FanOutReport};
pub use inference::{
    CachedContent, GenerateRequest, GeneratedContent, HttpInferenceClient, InferenceClient,
    InferenceError, MediaReference, ModelSpec, TimeWindow,
};
pub use ledger::{
    Ledger, LedgerError, LedgerResult, LedgerWriter, StepOutcome, StepRunner, StepState,
    StepStatus,
};
pub use metadata::{
    MemoryMetadataStore, MetadataError, MetadataStore, ObjectRef, SqliteMetadataStore,
    SqliteMetadataStoreBuilder,
};
pub use metrics::{TokenCounters, TokenUsage};
pub use pipeline::{
    AnalysisContext, AnalysisPipeline, PipelineError, PipelineReport, PipelineResult,
    ProxyStage, RunContext, StageReport,
};
pub use probe::{MediaProbe, ProbeConfig, ProbeError, ProxyConfig, ProxyTranscoder};
pub use table::{SqliteTableStore, TableError, TableRow, TableStore};
pub use templates::{TemplateError, TemplateService};
