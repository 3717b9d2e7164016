mod models;
mod schema;
pub mod timestamp;

pub use models::{
    example_segment, example_summary, CastMember, Media, MediaSummary, Segment,
    SegmentEmbedding, TimeSpan,
};
pub use schema::{media_summary_schema, segment_schema};
pub use timestamp::{correct_timestamp, format_hms, parse_flexible, parse_hms, TimestampError};
