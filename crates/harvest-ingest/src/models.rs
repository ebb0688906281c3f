//! Data carried between the fetcher, the pipeline and the sink

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One paginated search, e.g. all issues of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Stable identifier; keys the checkpoint and names the output file
    pub id: String,
    /// Search predicate sent as the `jql` parameter
    pub jql: String,
}

impl QuerySpec {
    pub fn new(id: impl Into<String>, jql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            jql: jql.into(),
        }
    }

    /// All issues of `project`, oldest first.
    ///
    /// Ascending creation order keeps offsets stable while new issues arrive.
    pub fn project(project: &str) -> Self {
        let key = project.trim().to_uppercase();
        Self {
            jql: format!("project={} ORDER BY created ASC", key),
            id: key,
        }
    }
}

/// Untransformed fields of one issue.
///
/// Every field is optional: absence, `null` and a value of the wrong type
/// all read as `None`. Normalization decides what `None` becomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub key: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub reporter: Option<String>,
    pub assignee: Option<String>,
    pub labels: Option<Vec<String>>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub comments: Option<Vec<String>>,
}

impl RawRecord {
    /// Extract the known fields from one element of the `issues` array.
    ///
    /// Never fails; a non-object issue yields an all-`None` record.
    pub fn from_issue(issue: &Value) -> Self {
        let fields = issue.get("fields").unwrap_or(&Value::Null);

        Self {
            key: text_at(issue, &["key"]),
            title: text_at(fields, &["summary"]),
            description: text_at(fields, &["description"]),
            status: text_at(fields, &["status", "name"]),
            priority: text_at(fields, &["priority", "name"]),
            reporter: text_at(fields, &["reporter", "displayName"]),
            assignee: text_at(fields, &["assignee", "displayName"]),
            labels: fields.get("labels").and_then(Value::as_array).map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            }),
            created: text_at(fields, &["created"]),
            updated: text_at(fields, &["updated"]),
            comments: fields
                .get("comment")
                .and_then(|c| c.get("comments"))
                .and_then(Value::as_array)
                .map(|comments| {
                    comments
                        .iter()
                        .filter_map(|c| c.get("body").and_then(Value::as_str))
                        .filter(|body| !body.is_empty())
                        .map(str::to_string)
                        .collect()
                }),
        }
    }
}

fn text_at(value: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(value, |cur, key| cur.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// One page of search results as returned by the fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// Offset that was requested
    pub offset: u64,
    /// Page size that was requested
    pub page_size: u32,
    /// Total matches reported by the server
    pub total: u64,
}

impl Page {
    /// An empty page short of `total` means the server dropped results
    pub fn is_stalled(&self) -> bool {
        self.records.is_empty() && self.offset < self.total
    }
}

/// A single question/answer pair derived from an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QnaPair {
    pub q: String,
    pub a: String,
}

/// Rule-based fields computed from the issue text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derived {
    pub summary: String,
    pub classification: String,
    pub qna: Vec<QnaPair>,
}

/// Normalized output record, one JSON line per issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub project: String,
    pub issue_id: String,
    pub title: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub reporter: Option<String>,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub description: String,
    pub comments: Vec<String>,
    pub derived: Derived,
}
