//! Rule-based fields derived from issue text
//!
//! Deterministic keyword heuristics; no I/O and no state.

use crate::models::{Derived, QnaPair};

const SUMMARY_SENTENCES: usize = 2;

/// Minimum trimmed length for a comment to count as a discussion outcome
const SUBSTANTIVE_COMMENT_LEN: usize = 10;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("bug", &["bug", "error", "exception", "stacktrace", "crash", "fail"]),
    ("feature_request", &["feature", "enhance", "improve", "support", "add"]),
    ("documentation", &["doc", "documentation", "readme", "guide", "docs"]),
    ("performance", &["performance", "slow", "optimi", "latency"]),
    ("configuration", &["config", "configuration", "setting", "property"]),
    ("test", &["test", "unit test", "integration test", "flaky"]),
];

/// Compute all derived fields for one issue
pub fn derive(title: &str, description: &str, labels: &[String], comments: &[String]) -> Derived {
    Derived {
        summary: summarize(description),
        classification: classify(title, description, labels).to_string(),
        qna: qna(title, description, comments),
    }
}

/// First two sentences, split naively on `.`
pub fn summarize(text: &str) -> String {
    let text = text.replace('\r', " ");
    let sentences: Vec<&str> = text
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if sentences.is_empty() {
        return String::new();
    }

    let take = sentences.len().min(SUMMARY_SENTENCES);
    format!("{}.", sentences[..take].join(". "))
}

/// Highest-scoring category, `other` when nothing matches.
///
/// Ties go to the category listed first.
pub fn classify(title: &str, description: &str, labels: &[String]) -> &'static str {
    let text = format!("{} {}", title, description).to_lowercase();
    let labels_text = labels.join(" ").to_lowercase();

    let mut best = ("other", 0usize);
    for (category, keywords) in CATEGORIES {
        let score = keywords
            .iter()
            .filter(|kw| text.contains(*kw) || labels_text.contains(*kw))
            .count();
        if score > best.1 {
            best = (category, score);
        }
    }
    best.0
}

/// Up to two question/answer pairs describing the issue and its discussion
pub fn qna(title: &str, description: &str, comments: &[String]) -> Vec<QnaPair> {
    let mut pairs = Vec::new();

    if !title.is_empty() || !description.is_empty() {
        let answer = if description.is_empty() {
            title.to_string()
        } else {
            format!("{} - {}", title, summarize(description))
        };
        pairs.push(QnaPair {
            q: "What is the issue described?".to_string(),
            a: answer.trim().to_string(),
        });
    }

    let last_substantive = comments
        .iter()
        .rev()
        .map(|c| c.trim())
        .find(|c| c.chars().count() > SUBSTANTIVE_COMMENT_LEN);

    if let Some(comment) = last_substantive {
        pairs.push(QnaPair {
            q: "What updates or decisions were made in the discussion?".to_string(),
            a: comment.to_string(),
        });
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_takes_two_sentences() {
        assert_eq!(
            summarize("The broker dies. It leaks fds.\r\nThird one. Fourth."),
            "The broker dies. It leaks fds."
        );
        assert_eq!(summarize("no terminator"), "no terminator.");
        assert_eq!(summarize(""), "");
        assert_eq!(summarize(" . . "), "");
    }

    #[test]
    fn test_classify_by_keywords_and_labels() {
        assert_eq!(classify("NPE crash in parser", "throws exception", &[]), "bug");
        assert_eq!(classify("Slow startup", "latency regression", &[]), "performance");
        assert_eq!(classify("Something", "", &["documentation".to_string()]), "documentation");
        assert_eq!(classify("Hmm", "", &[]), "other");
    }

    #[test]
    fn test_classify_tie_prefers_first_category() {
        // one bug keyword, one test keyword
        assert_eq!(classify("flaky error", "", &[]), "bug");
    }

    #[test]
    fn test_qna_pairs() {
        let comments = vec![
            "Agreed, will fix in 3.1".to_string(),
            "  +1  ".to_string(),
        ];
        let pairs = qna("Broker crash", "Leader dies. Details follow.", &comments);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].a, "Broker crash - Leader dies. Details follow.");
        assert_eq!(pairs[1].a, "Agreed, will fix in 3.1");
    }

    #[test]
    fn test_qna_empty_issue() {
        assert!(qna("", "", &["short".to_string()]).is_empty());
    }
}
