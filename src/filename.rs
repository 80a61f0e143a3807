//! Filename synthesis from a metadata record.
//!
//! Deterministic, pure: fixed field order (date, organization, subject,
//! receiver), fixed separator, per-segment sanitization. Missing fields
//! stay as empty segments so the field positions read the same in every
//! generated name.

use serde::{Deserialize, Serialize};

use crate::metadata::MetadataRecord;

/// Characters not allowed in filenames on at least one supported platform.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Segment length cap; longer values are cut to 47 chars plus an ellipsis.
const MAX_SEGMENT_LEN: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilenameTemplate {
    pub separator: String,
    /// Name used when every field is empty.
    pub fallback_stem: String,
}

impl Default for FilenameTemplate {
    fn default() -> Self {
        Self {
            separator: " - ".to_string(),
            fallback_stem: "document".to_string(),
        }
    }
}

/// Build the candidate filename (stem + original extension). Does not
/// touch the filesystem.
pub fn synthesize(record: &MetadataRecord, template: &FilenameTemplate, extension: &str) -> String {
    let segments = [
        sanitize_segment(record.date.value.as_deref().unwrap_or("")),
        sanitize_segment(record.organization.value.as_deref().unwrap_or("")),
        sanitize_segment(record.subject.value.as_deref().unwrap_or("")),
        sanitize_segment(record.receiver.value.as_deref().unwrap_or("")),
    ];

    let stem = if segments.iter().all(|s| s.is_empty()) {
        template.fallback_stem.clone()
    } else {
        segments.join(&template.separator)
    };

    format!("{}{}", stem, extension)
}

/// Strip filesystem-illegal characters and collapse whitespace in one
/// field value.
pub fn sanitize_segment(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() > MAX_SEGMENT_LEN {
        let cut: String = collapsed.chars().take(MAX_SEGMENT_LEN - 3).collect();
        format!("{}...", cut)
    } else {
        collapsed
    }
}
