use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: String,
    pub end: String,
}

impl TimeSpan {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastMember {
    pub character_name: String,
    pub actor_name: String,
}

/// Whole-media summary produced by the content summary stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSummary {
    pub title: String,
    pub category: String,
    pub summary: String,
    pub length_in_seconds: u64,
    pub media_url: String,
    pub director: String,
    pub release_year: i32,
    pub genre: String,
    pub rating: String,
    pub cast: Vec<CastMember>,
    pub segment_timestamps: Vec<TimeSpan>,
}

/// Output of one segment summary sub-step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Segment {
    pub sequence_number: u32,
    pub start: String,
    pub end: String,
    pub script: String,
    pub cast: Vec<CastMember>,
}

/// Persisted media row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    pub title: String,
    pub category: String,
    pub summary: String,
    pub media_url: String,
    pub length_in_seconds: u64,
    pub director: String,
    pub release_year: i32,
    pub genre: String,
    pub rating: String,
    pub cast: Vec<CastMember>,
    pub segments: Vec<Segment>,
    pub created_at: DateTime<Utc>,
}

impl Media {
    pub fn from_summary(id: impl Into<String>, summary: MediaSummary, length_secs: u64) -> Self {
        Self {
            id: id.into(),
            title: summary.title,
            category: summary.category,
            summary: summary.summary,
            media_url: summary.media_url,
            length_in_seconds: length_secs,
            director: summary.director,
            release_year: summary.release_year,
            genre: summary.genre,
            rating: summary.rating,
            cast: summary.cast,
            segments: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEmbedding {
    pub media_id: String,
    pub segment_id: u32,
    pub model_name: String,
    pub embeddings: Vec<f64>,
}

impl SegmentEmbedding {
    /// Row id in the embeddings table.
    pub fn row_id(&self) -> String {
        format!("{}_{}", self.media_id, self.segment_id)
    }
}

pub fn example_summary() -> MediaSummary {
    MediaSummary {
        title: "The Lighthouse Keeper".into(),
        category: "drama".into(),
        summary: "A retired sailor takes a post on a remote island and slowly uncovers \
                  what happened to the keeper before him."
            .into(),
        length_in_seconds: 1800,
        media_url: String::new(),
        director: "Ana Ferreira".into(),
        release_year: 2019,
        genre: "Mystery".into(),
        rating: "PG-13".into(),
        cast: vec![
            CastMember {
                character_name: "Tomas".into(),
                actor_name: "Luis Prado".into(),
            },
            CastMember {
                character_name: "Marta".into(),
                actor_name: "Ines Costa".into(),
            },
        ],
        segment_timestamps: vec![
            TimeSpan::new("00:00:00", "00:04:12"),
            TimeSpan::new("00:04:12", "00:11:40"),
            TimeSpan::new("00:11:40", "00:30:00"),
        ],
    }
}

pub fn example_segment() -> Segment {
    Segment {
        sequence_number: 1,
        start: "00:00:00".into(),
        end: "00:04:12".into(),
        script: "Tomas arrives on the ferry at dawn and is met at the pier by Marta, \
                 who hands him the keys and a logbook with its last pages torn out."
            .into(),
        cast: vec![CastMember {
            character_name: "Tomas".into(),
            actor_name: "Luis Prado".into(),
        }],
    }
}
