//! Utility functions shared by the ingestion paths

use crate::types::{SystemId, TalkgroupId, UnitId};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Call metadata recovered from a watched file's name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    /// Capture date fragment (`YYYYMMDD`)
    pub date: Option<String>,

    /// Capture time fragment (`HHMMSS`)
    pub time: Option<String>,

    /// System id
    pub system: Option<SystemId>,

    /// Talkgroup id
    pub talkgroup: Option<TalkgroupId>,

    /// Source unit id
    pub unit: Option<UnitId>,

    /// Frequency in Hz
    pub frequency: Option<i64>,
}

impl FileMetadata {
    /// Combine the date and time fragments into a UTC instant
    #[must_use]
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        let (date, time) = (self.date.as_ref()?, self.time.as_ref()?);
        chrono::NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y%m%d %H%M%S")
            .map(|dt| dt.and_utc())
            .ok()
    }
}

/// Extract call metadata from a filename using a mask
///
/// The mask mixes literal characters with `#DATE`, `#TIME`, `#SYS`, `#TG`,
/// `#UNIT` and `#HZ` tokens, e.g. `#DATE_#TIME_#SYS_#TG_#UNIT`. Each token
/// consumes a run of digits from the file stem; literal characters must
/// match exactly.
///
/// # Errors
///
/// Returns a validation error if the file stem does not fit the mask.
pub fn parse_filename_mask(filename: &str, mask: &str) -> crate::Result<FileMetadata> {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| crate::Error::Validation {
            field: "filename".to_string(),
            message: "invalid filename".to_string(),
        })?;

    let mismatch = || crate::Error::Validation {
        field: "filename".to_string(),
        message: format!("\"{stem}\" does not match mask \"{mask}\""),
    };

    let mut meta = FileMetadata::default();
    let mut chars = stem.chars().peekable();
    let mut mask_chars = mask.chars().peekable();

    while let Some(&m) = mask_chars.peek() {
        if m == '#' {
            mask_chars.next();
            let mut token = String::new();
            while let Some(&c) = mask_chars.peek() {
                if !c.is_ascii_uppercase() {
                    break;
                }
                token.push(c);
                mask_chars.next();
            }

            let mut digits = String::new();
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_digit() {
                    break;
                }
                digits.push(c);
                chars.next();
            }
            if digits.is_empty() {
                return Err(mismatch());
            }

            match token.as_str() {
                "DATE" => meta.date = Some(digits),
                "TIME" => meta.time = Some(digits),
                "SYS" => meta.system = digits.parse().ok(),
                "TG" => meta.talkgroup = digits.parse().ok(),
                "UNIT" => meta.unit = digits.parse().ok(),
                "HZ" => meta.frequency = digits.parse().ok(),
                _ => return Err(mismatch()),
            }
        } else {
            mask_chars.next();
            if chars.next() != Some(m) {
                return Err(mismatch());
            }
        }
    }

    Ok(meta)
}

/// Infer an audio MIME type from a file name
#[must_use]
pub fn infer_audio_type(filename: &str) -> Option<&'static str> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())?
        .to_lowercase();

    match extension.as_str() {
        "aac" => Some("audio/aac"),
        "flac" => Some("audio/flac"),
        "m4a" | "mp4" => Some("audio/mp4"),
        "mp3" => Some("audio/mpeg"),
        "oga" | "ogg" => Some("audio/ogg"),
        "wav" => Some("audio/x-wav"),
        "wma" => Some("audio/x-ms-wma"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_filename_mask() {
        let meta =
            parse_filename_mask("20240501_083000_11_1001_4007.mp3", "#DATE_#TIME_#SYS_#TG_#UNIT")
                .unwrap();

        assert_eq!(meta.date.as_deref(), Some("20240501"));
        assert_eq!(meta.time.as_deref(), Some("083000"));
        assert_eq!(meta.system, Some(11));
        assert_eq!(meta.talkgroup, Some(1001));
        assert_eq!(meta.unit, Some(4007));
        assert_eq!(meta.frequency, None);
    }

    #[test]
    fn test_parse_filename_mask_frequency() {
        let meta = parse_filename_mask("1001-857237500.wav", "#TG-#HZ").unwrap();
        assert_eq!(meta.talkgroup, Some(1001));
        assert_eq!(meta.frequency, Some(857_237_500));
    }

    #[test]
    fn test_parse_filename_mask_mismatch() {
        assert!(parse_filename_mask("nodigits_here.mp3", "#DATE_#TIME").is_err());
        assert!(parse_filename_mask("20240501-083000.mp3", "#DATE_#TIME").is_err());
        assert!(parse_filename_mask("20240501_083000.mp3", "#DATE_#BOGUS").is_err());
    }

    #[test]
    fn test_file_metadata_date_time() {
        let meta = FileMetadata {
            date: Some("20240501".to_string()),
            time: Some("083000".to_string()),
            ..FileMetadata::default()
        };
        let dt = meta.date_time().unwrap();
        assert_eq!(dt.hour(), 8);
        assert_eq!(dt.minute(), 30);

        assert!(FileMetadata::default().date_time().is_none());
    }

    #[test]
    fn test_infer_audio_type() {
        assert_eq!(infer_audio_type("call.mp3"), Some("audio/mpeg"));
        assert_eq!(infer_audio_type("call.M4A"), Some("audio/mp4"));
        assert_eq!(infer_audio_type("call.wav"), Some("audio/x-wav"));
        assert_eq!(infer_audio_type("call.txt"), None);
        assert_eq!(infer_audio_type("noextension"), None);
    }
}
