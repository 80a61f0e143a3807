//! The metadata record behind the rename form, field provenance rules,
//! and routing of text selections into fields.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ai::MetadataFields;
use crate::error::RouteError;

/// Origin of a metadata field value. User edits are sticky: once a field
/// is `UserEdited`, AI analysis never silently overwrites it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Empty,
    UserEdited,
    AiDerived,
}

/// The four rename fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    Date,
    Organization,
    Subject,
    Receiver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    pub value: Option<String>,
    pub provenance: Provenance,
}

impl Default for FieldValue {
    fn default() -> Self {
        Self {
            value: None,
            provenance: Provenance::Empty,
        }
    }
}

/// One live record per open document. Fields are independently settable;
/// a partial record is valid and simply yields placeholder segments in
/// the synthesized filename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub date: FieldValue,
    pub organization: FieldValue,
    pub subject: FieldValue,
    pub receiver: FieldValue,
}

impl MetadataRecord {
    pub fn field(&self, field: MetadataField) -> &FieldValue {
        match field {
            MetadataField::Date => &self.date,
            MetadataField::Organization => &self.organization,
            MetadataField::Subject => &self.subject,
            MetadataField::Receiver => &self.receiver,
        }
    }

    fn field_mut(&mut self, field: MetadataField) -> &mut FieldValue {
        match field {
            MetadataField::Date => &mut self.date,
            MetadataField::Organization => &mut self.organization,
            MetadataField::Subject => &mut self.subject,
            MetadataField::Receiver => &mut self.receiver,
        }
    }

    /// Direct user edit; permanently flips provenance to `UserEdited`.
    /// An empty value clears the field but keeps it user-owned, so a later
    /// AI pass does not resurrect a value the user deleted.
    pub fn set_user(&mut self, field: MetadataField, value: impl Into<String>) {
        let value = value.into();
        let slot = self.field_mut(field);
        slot.value = if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        };
        slot.provenance = Provenance::UserEdited;
    }

    /// Merge AI-derived fields. User-edited fields are never touched.
    /// Prior AI-derived values are only replaced when `overwrite_ai` is
    /// set (the confirmed "Refresh AI Analysis" intent).
    pub fn apply_ai(&mut self, fields: &MetadataFields, overwrite_ai: bool) {
        let pairs = [
            (MetadataField::Date, &fields.date),
            (MetadataField::Organization, &fields.organization),
            (MetadataField::Subject, &fields.subject),
            (MetadataField::Receiver, &fields.receiver),
        ];

        for (field, incoming) in pairs {
            let Some(value) = incoming else { continue };
            let slot = self.field_mut(field);
            match slot.provenance {
                Provenance::UserEdited => {}
                Provenance::AiDerived if !overwrite_ai => {}
                _ => {
                    slot.value = Some(value.clone());
                    slot.provenance = Provenance::AiDerived;
                }
            }
        }
    }

    /// Snapshot of the current values (the host's form-data view).
    pub fn snapshot(&self) -> MetadataFields {
        MetadataFields {
            date: self.date.value.clone(),
            organization: self.organization.value.clone(),
            subject: self.subject.value.clone(),
            receiver: self.receiver.value.clone(),
        }
    }

    /// Restore form data as user-entered values (skips empty fields).
    pub fn apply_snapshot(&mut self, fields: &MetadataFields) {
        let pairs = [
            (MetadataField::Date, &fields.date),
            (MetadataField::Organization, &fields.organization),
            (MetadataField::Subject, &fields.subject),
            (MetadataField::Receiver, &fields.receiver),
        ];
        for (field, value) in pairs {
            if let Some(value) = value {
                self.set_user(field, value.clone());
            }
        }
    }
}

/// Route a selected text span into a target field with normalization.
///
/// Dates parse through a broad format table into canonical `YYYY-MM-DD`;
/// other fields are trimmed and stored verbatim. Returns the normalized
/// value that was stored.
pub fn route_selection(
    record: &mut MetadataRecord,
    selection: &str,
    field: MetadataField,
) -> Result<String, RouteError> {
    let trimmed = selection.trim();
    if trimmed.is_empty() {
        return Err(RouteError::NoTextSelected);
    }

    let normalized = match field {
        MetadataField::Date => parse_date(trimmed)
            .ok_or_else(|| RouteError::InvalidDateFormat(trimmed.to_string()))?
            .format("%Y-%m-%d")
            .to_string(),
        _ => trimmed.to_string(),
    };

    record.set_user(field, normalized.clone());
    tracing::debug!("[Router] Routed selection into {:?}: {}", field, normalized);
    Ok(normalized)
}

/// Human date formats accepted by the router. Day-first is tried before
/// month-first for the ambiguous slash forms.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%m/%d/%Y",
];

pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
}
