//! RawRecord -> IssueRecord
//!
//! Every optional field and its default is listed in [`OptionalField`];
//! normalization applies that table once per record and cannot fail.

use crate::derive;
use crate::models::{IssueRecord, RawRecord};
use chrono::{DateTime, SecondsFormat};
use tracing::debug;

/// Value substituted for an absent field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    EmptyText,
    Null,
    EmptyList,
}

/// Fields that may be missing from a search result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalField {
    IssueId,
    Title,
    Description,
    Status,
    Priority,
    Reporter,
    Assignee,
    Created,
    Updated,
    Labels,
    Comments,
}

impl OptionalField {
    pub const ALL: [OptionalField; 11] = [
        OptionalField::IssueId,
        OptionalField::Title,
        OptionalField::Description,
        OptionalField::Status,
        OptionalField::Priority,
        OptionalField::Reporter,
        OptionalField::Assignee,
        OptionalField::Created,
        OptionalField::Updated,
        OptionalField::Labels,
        OptionalField::Comments,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OptionalField::IssueId => "issue_id",
            OptionalField::Title => "title",
            OptionalField::Description => "description",
            OptionalField::Status => "status",
            OptionalField::Priority => "priority",
            OptionalField::Reporter => "reporter",
            OptionalField::Assignee => "assignee",
            OptionalField::Created => "created",
            OptionalField::Updated => "updated",
            OptionalField::Labels => "labels",
            OptionalField::Comments => "comments",
        }
    }

    pub fn default_value(self) -> FieldDefault {
        match self {
            OptionalField::IssueId | OptionalField::Title | OptionalField::Description => {
                FieldDefault::EmptyText
            },
            OptionalField::Labels | OptionalField::Comments => FieldDefault::EmptyList,
            _ => FieldDefault::Null,
        }
    }

    fn is_missing(self, raw: &RawRecord) -> bool {
        match self {
            OptionalField::IssueId => raw.key.is_none(),
            OptionalField::Title => raw.title.is_none(),
            OptionalField::Description => raw.description.is_none(),
            OptionalField::Status => raw.status.is_none(),
            OptionalField::Priority => raw.priority.is_none(),
            OptionalField::Reporter => raw.reporter.is_none(),
            OptionalField::Assignee => raw.assignee.is_none(),
            OptionalField::Created => raw.created.is_none(),
            OptionalField::Updated => raw.updated.is_none(),
            OptionalField::Labels => raw.labels.is_none(),
            OptionalField::Comments => raw.comments.is_none(),
        }
    }
}

/// Names of the fields `raw` lacks
pub fn missing_fields(raw: &RawRecord) -> Vec<&'static str> {
    OptionalField::ALL
        .iter()
        .filter(|f| f.is_missing(raw))
        .map(|f| f.name())
        .collect()
}

/// Build the output record for `raw`, which belongs to query `project`
pub fn normalize(project: &str, raw: &RawRecord) -> IssueRecord {
    let missing = missing_fields(raw);
    if !missing.is_empty() {
        debug!(
            issue_id = raw.key.as_deref().unwrap_or(""),
            missing = ?missing,
            "Record has absent fields; using defaults"
        );
    }

    let title = raw.title.clone().unwrap_or_default();
    let description = raw.description.clone().unwrap_or_default();
    let labels = raw.labels.clone().unwrap_or_default();
    let comments = raw.comments.clone().unwrap_or_default();
    let derived = derive::derive(&title, &description, &labels, &comments);

    IssueRecord {
        project: project.to_string(),
        issue_id: raw.key.clone().unwrap_or_default(),
        title,
        status: raw.status.clone(),
        priority: raw.priority.clone(),
        reporter: raw.reporter.clone(),
        assignee: raw.assignee.clone(),
        labels,
        created: raw.created.as_deref().map(normalize_timestamp),
        updated: raw.updated.as_deref().map(normalize_timestamp),
        description,
        comments,
        derived,
    }
}

/// RFC 3339 when the text parses as a timestamp, the raw text otherwise.
///
/// Handles the tracker's `2014-01-01T10:00:00.000+0000` form, whose offset
/// lacks the colon RFC 3339 requires.
pub fn normalize_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, false))
        .unwrap_or_else(|_| raw.to_string())
}
