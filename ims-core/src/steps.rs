pub const GENERATE_PROXY: &str = "ims_generate_proxy";
pub const CONTENT_LENGTH: &str = "ims_content_length";
pub const CONTENT_TYPE: &str = "ims_content_type";
pub const CONTENT_SUMMARY: &str = "ims_content_summary";
pub const SEGMENT_SUMMARY_PREFIX: &str = "ims_segment_summary_";
pub const SEGMENT_SUMMARY_ALL: &str = "ims_segment_summary_all";
pub const PERSIST: &str = "ims_persist";
pub const GENERATE_EMBEDDINGS: &str = "ims_generate_embeddings";

/// Steps of the analyze workflow in execution order.
pub const ANALYSIS_STEPS: [&str; 6] = [
    CONTENT_LENGTH,
    CONTENT_TYPE,
    CONTENT_SUMMARY,
    SEGMENT_SUMMARY_ALL,
    PERSIST,
    GENERATE_EMBEDDINGS,
];

pub fn content_summary_chunk(start_secs: u64, end_secs: u64) -> String {
    format!("{CONTENT_SUMMARY}_{start_secs}_{end_secs}")
}

/// `sequence` is 1-based.
pub fn segment_summary(sequence: usize) -> String {
    format!("{SEGMENT_SUMMARY_PREFIX}{sequence}")
}

pub fn segment_summaries(count: usize) -> Vec<String> {
    (1..=count).map(segment_summary).collect()
}
