use tracing::info;

use crate::config::TableStoreSection;
use crate::ledger::StepOutcome;
use crate::media::{Media, SegmentEmbedding};
use crate::steps;
use crate::table::{TableRow, MAX_ROWS_PER_INSERT};

use super::{required, AnalysisContext, PipelineError, PipelineResult};

#[derive(Debug, Clone)]
pub struct EmbeddingsStage {
    model_name: String,
    table: TableStoreSection,
}

impl EmbeddingsStage {
    pub fn new(model_name: impl Into<String>, table: TableStoreSection) -> Self {
        Self {
            model_name: model_name.into(),
            table,
        }
    }

    pub async fn run(&self, ctx: &AnalysisContext) -> PipelineResult<StepOutcome> {
        ctx.ledger
            .runner()
            .run(steps::GENERATE_EMBEDDINGS, || self.embed(ctx))
            .await
    }

    async fn embed(&self, ctx: &AnalysisContext) -> PipelineResult<String> {
        let inputs = ctx.ledger.steps_output(&[steps::PERSIST]).await?;
        let media_id = required(&inputs, steps::PERSIST)?.to_string();
        let row = ctx
            .tables
            .fetch(&self.table.dataset, &self.table.media_table, &media_id)
            .await?
            .ok_or_else(|| PipelineError::MediaNotFound(media_id.clone()))?;
        let media: Media = serde_json::from_value(row)?;

        let mut embeddings = Vec::with_capacity(media.segments.len());
        for segment in &media.segments {
            let vector = ctx
                .inference
                .embed_content(&self.model_name, &segment.script)
                .await?;
            embeddings.push(SegmentEmbedding {
                media_id: media.id.clone(),
                segment_id: segment.sequence_number,
                model_name: self.model_name.clone(),
                embeddings: vector,
            });
        }

        let batch_size = self.table.insert_batch_size.clamp(1, MAX_ROWS_PER_INSERT);
        for batch in embeddings.chunks(batch_size) {
            let rows = batch
                .iter()
                .map(|embedding| TableRow::from_record(embedding.row_id(), embedding))
                .collect::<Result<Vec<_>, _>>()?;
            ctx.tables
                .insert(&self.table.dataset, &self.table.embedding_table, rows)
                .await?;
        }
        info!(
            object = %ctx.run.object,
            media_id = %media_id,
            segments = embeddings.len(),
            "embeddings persisted"
        );
        Ok(format!(
            "generated and persisted embeddings for {} segments",
            embeddings.len()
        ))
    }
}
