use serde_json::{json, Value};

fn cast_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "character_name": {"type": "string"},
                "actor_name": {"type": "string"}
            },
            "required": ["character_name", "actor_name"]
        }
    })
}

/// Response schema for the content summary prompt.
pub fn media_summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "category": {"type": "string"},
            "summary": {"type": "string"},
            "length_in_seconds": {"type": "integer"},
            "director": {"type": "string"},
            "release_year": {"type": "integer"},
            "genre": {"type": "string"},
            "rating": {"type": "string"},
            "cast": cast_schema(),
            "segment_timestamps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "start": {"type": "string"},
                        "end": {"type": "string"}
                    },
                    "required": ["start", "end"]
                }
            }
        },
        "required": ["title", "category", "summary", "segment_timestamps"]
    })
}

/// Response schema for the segment summary prompt.
pub fn segment_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sequence_number": {"type": "integer"},
            "start": {"type": "string"},
            "end": {"type": "string"},
            "script": {"type": "string"},
            "cast": cast_schema()
        },
        "required": ["sequence_number", "start", "end", "script"]
    })
}
