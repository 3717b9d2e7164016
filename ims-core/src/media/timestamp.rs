use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid timestamp '{value}'")]
pub struct TimestampError {
    pub value: String,
}

impl TimestampError {
    fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
        }
    }
}

fn parse_parts(value: &str) -> Result<Vec<u64>, TimestampError> {
    value
        .trim()
        .split(':')
        .map(|part| part.trim().parse::<u64>().map_err(|_| TimestampError::new(value)))
        .collect()
}

fn hms_secs(h: u64, m: u64, s: u64) -> Option<u64> {
    h.checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

/// Seconds in an `HH:MM:SS` timestamp. Fields may exceed their usual range.
pub fn parse_hms(value: &str) -> Result<u64, TimestampError> {
    match parse_parts(value)?.as_slice() {
        &[h, m, s] => hms_secs(h, m, s).ok_or_else(|| TimestampError::new(value)),
        _ => Err(TimestampError::new(value)),
    }
}

/// Accepts `MM:SS` as well as `HH:MM:SS`.
pub fn parse_flexible(value: &str) -> Result<u64, TimestampError> {
    let secs = match parse_parts(value)?.as_slice() {
        &[m, s] => hms_secs(0, m, s),
        &[h, m, s] => hms_secs(h, m, s),
        _ => None,
    };
    secs.ok_or_else(|| TimestampError::new(value))
}

pub fn format_hms(total_secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

/// Shifts a chunk-relative `HH:MM:SS` by `offset_secs`. `None` if unparseable.
pub fn rebase(value: &str, offset_secs: u64) -> Option<String> {
    parse_hms(value)
        .ok()
        .and_then(|secs| secs.checked_add(offset_secs))
        .map(format_hms)
}

/// Repairs a timestamp that lies past the end of the media.
///
/// Models sometimes emit `MM:SS:FF` where `HH:MM:SS` was asked for. When the
/// value is out of range and `00:HH:MM` fits, that reading is used; otherwise
/// the value is clamped to `length_secs`. Unparseable or overflowing input is
/// returned as is.
pub fn correct_timestamp(value: &str, length_secs: u64) -> String {
    let Ok(parts) = parse_parts(value) else {
        return value.to_string();
    };
    let &[h, m, s] = parts.as_slice() else {
        return value.to_string();
    };
    let Some(secs) = hms_secs(h, m, s) else {
        return value.to_string();
    };
    if secs <= length_secs {
        return value.to_string();
    }
    if hms_secs(0, h, m).is_some_and(|secs| secs <= length_secs) {
        return format!("00:{h:02}:{m:02}");
    }
    format_hms(length_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_layouts() {
        assert_eq!(parse_hms("01:02:03").unwrap(), 3723);
        assert_eq!(parse_flexible("02:03").unwrap(), 123);
        assert_eq!(parse_flexible("00:02:03").unwrap(), 123);
        assert!(parse_hms("02:03").is_err());
        assert!(parse_flexible("1:2:3:4").is_err());
        assert!(parse_flexible("aa:bb").is_err());
    }

    #[test]
    fn formats_with_padding() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(3723), "01:02:03");
        assert_eq!(format_hms(90061), "25:01:01");
    }

    #[test]
    fn rebases_chunk_relative_spans() {
        assert_eq!(rebase("00:01:00", 600).as_deref(), Some("00:11:00"));
        assert_eq!(rebase("00:02:00", 600).as_deref(), Some("00:12:00"));
        assert_eq!(rebase("garbage", 600), None);
    }

    #[test]
    fn corrects_minutes_written_as_hours() {
        assert_eq!(correct_timestamp("25:10:00", 3600), "00:25:10");
    }

    #[test]
    fn keeps_in_range_and_clamps_hopeless_values() {
        assert_eq!(correct_timestamp("00:59:59", 3600), "00:59:59");
        assert_eq!(correct_timestamp("99:00:00", 3600), "01:00:00");
        assert_eq!(correct_timestamp("12:30", 60), "12:30");
        assert_eq!(correct_timestamp("x:y:z", 60), "x:y:z");
    }

    #[test]
    fn oversized_fields_are_errors_not_overflows() {
        let huge = "9999999999999999:00:00";
        assert!(parse_hms(huge).is_err());
        assert!(parse_flexible(huge).is_err());
        assert!(parse_flexible("999999999999999999:00").is_err());
        assert_eq!(rebase(huge, 600), None);
        assert_eq!(rebase("00:00:01", u64::MAX), None);
        assert_eq!(correct_timestamp(huge, 3600), huge);
        assert_eq!(correct_timestamp("00:99999999999999999:00", 3600), "01:00:00");
    }
}
