use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::TableStoreSection;
use crate::ledger::StepOutcome;
use crate::media::{correct_timestamp, parse_hms, Media, MediaSummary, Segment};
use crate::metadata::ObjectRef;
use crate::steps;
use crate::table::TableRow;

use super::length::parse_length;
use super::{required, AnalysisContext, PipelineError, PipelineResult};

/// Stable media id for an object: the first 32 hex digits of SHA-256 over `bucket/object`.
pub fn media_id(object: &ObjectRef) -> String {
    let digest = Sha256::digest(object.to_string().as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(32);
    id
}

/// Turns recorded segment outputs into persisted segments, in start order.
///
/// Missing or malformed outputs and empty scripts are left out. A sequence
/// number of zero becomes the 1-based position of the segment.
pub fn collect_segments(
    step_ids: &[String],
    outputs: &HashMap<String, String>,
    length_secs: u64,
) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(step_ids.len());
    for (index, step_id) in step_ids.iter().enumerate() {
        let Some(raw) = outputs.get(step_id) else {
            warn!(step = %step_id, "segment summary missing, skipping");
            continue;
        };
        let mut segment: Segment = match serde_json::from_str(raw) {
            Ok(segment) => segment,
            Err(err) => {
                warn!(step = %step_id, error = %err, "malformed segment summary, skipping");
                continue;
            }
        };
        if segment.sequence_number == 0 {
            segment.sequence_number = (index + 1) as u32;
        }
        if segment.script.trim().is_empty() {
            warn!(step = %step_id, "segment has an empty script, skipping");
            continue;
        }
        segment.start = correct_timestamp(&segment.start, length_secs);
        segment.end = correct_timestamp(&segment.end, length_secs);
        segments.push(segment);
    }
    segments.sort_by_key(|segment| parse_hms(&segment.start).unwrap_or(0));
    segments
}

#[derive(Debug, Clone)]
pub struct PersistStage {
    table: TableStoreSection,
}

impl PersistStage {
    pub fn new(table: TableStoreSection) -> Self {
        Self { table }
    }

    pub async fn run(&self, ctx: &AnalysisContext) -> PipelineResult<StepOutcome> {
        ctx.ledger
            .runner()
            .run(steps::PERSIST, || self.persist(ctx))
            .await
    }

    async fn persist(&self, ctx: &AnalysisContext) -> PipelineResult<String> {
        let inputs = ctx
            .ledger
            .steps_output(&[steps::CONTENT_LENGTH, steps::CONTENT_SUMMARY])
            .await?;
        let length = parse_length(steps::CONTENT_LENGTH, required(&inputs, steps::CONTENT_LENGTH)?)?;
        let summary: MediaSummary =
            serde_json::from_str(required(&inputs, steps::CONTENT_SUMMARY)?).map_err(|err| {
                PipelineError::InvalidInput {
                    step: steps::CONTENT_SUMMARY.to_string(),
                    reason: err.to_string(),
                }
            })?;

        let step_ids = steps::segment_summaries(summary.segment_timestamps.len());
        let outputs = ctx.ledger.steps_output(&step_ids).await?;
        let segments = collect_segments(&step_ids, &outputs, length);

        let id = media_id(&ctx.run.object);
        let mut media = Media::from_summary(id.clone(), summary, length);
        media.segments = segments;
        let row = TableRow::from_record(id.clone(), &media)?;
        ctx.tables
            .insert(&self.table.dataset, &self.table.media_table, vec![row])
            .await?;
        info!(
            object = %ctx.run.object,
            media_id = %id,
            segments = media.segments.len(),
            "media persisted"
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(sequence: u32, start: &str, end: &str, script: &str) -> String {
        serde_json::to_string(&Segment {
            sequence_number: sequence,
            start: start.into(),
            end: end.into(),
            script: script.into(),
            cast: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn media_id_is_stable_and_short() {
        let object = ObjectRef::new("media-in", "show.mp4");
        let id = media_id(&object);
        assert_eq!(id.len(), 32);
        assert_eq!(id, media_id(&object));
        assert_ne!(id, media_id(&ObjectRef::new("media-in", "other.mp4")));
    }

    #[test]
    fn segments_are_repaired_filtered_and_sorted() {
        let ids = steps::segment_summaries(5);
        let outputs = HashMap::from([
            (ids[0].clone(), output(0, "00:01:00", "00:02:00", "second")),
            (ids[1].clone(), output(0, "00:00:00", "00:01:00", "first")),
            (ids[2].clone(), output(3, "00:02:00", "00:03:00", "  ")),
            (ids[3].clone(), "{broken".to_string()),
        ]);
        let segments = collect_segments(&ids, &outputs, 3600);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].script, "first");
        assert_eq!(segments[0].sequence_number, 2);
        assert_eq!(segments[1].sequence_number, 1);
    }

    #[test]
    fn out_of_range_timestamps_are_corrected() {
        let ids = steps::segment_summaries(1);
        let outputs = HashMap::from([(ids[0].clone(), output(1, "25:10:00", "26:00:00", "s"))]);
        let segments = collect_segments(&ids, &outputs, 3600);
        assert_eq!(segments[0].start, "00:25:10");
        assert_eq!(segments[0].end, "00:26:00");
    }

    #[test]
    fn oversized_timestamps_are_kept_and_sort_first() {
        let ids = steps::segment_summaries(2);
        let huge = "9999999999999999:00:00";
        let outputs = HashMap::from([
            (ids[0].clone(), output(1, huge, huge, "broken")),
            (ids[1].clone(), output(2, "00:00:10", "00:00:20", "fine")),
        ]);
        let segments = collect_segments(&ids, &outputs, 3600);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].script, "broken");
        assert_eq!(segments[0].start, huge);
        assert_eq!(segments[1].script, "fine");
    }
}
