//! Progress bars for query harvesting

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const QUERY_TEMPLATE: &str =
    "{prefix:>12.bold} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} issues {msg}";

/// Container for per-query bars; draws nothing unless `visible`
pub fn create_multi_progress(visible: bool) -> MultiProgress {
    if visible {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }
}

/// Bar for one query positioned at `offset` of `total` records.
///
/// An unknown total starts at zero length and is set after the first page.
pub fn create_query_progress(query_id: &str, offset: u64, total: Option<u64>) -> ProgressBar {
    let pb = ProgressBar::new(total.unwrap_or(0));
    let style = ProgressStyle::default_bar()
        .template(QUERY_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_prefix(query_id.to_string());
    pb.set_position(offset);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_progress_resumes_at_offset() {
        let pb = create_query_progress("HADOOP", 50, Some(120));
        assert_eq!(pb.length(), Some(120));
        assert_eq!(pb.position(), 50);
    }

    #[test]
    fn test_unknown_total_starts_empty() {
        let pb = create_query_progress("SPARK", 0, None);
        assert_eq!(pb.length(), Some(0));
    }

    #[test]
    fn test_hidden_multi_progress() {
        let multi = create_multi_progress(false);
        let pb = multi.add(create_query_progress("KAFKA", 0, Some(10)));
        pb.inc(3);
        assert_eq!(pb.position(), 3);
    }
}
