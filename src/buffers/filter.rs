//! Shared filter vocabulary for the Console and Network buffers.
//!
//! Different filter kinds compose with AND; multiple values within one kind
//! (a comma-separated token set) compose with OR; a head/tail/range slice is
//! mutually exclusive with the others and is always applied last.

use regex::Regex;

use crate::error::AppError;

/// HTTP status code filter: an exact code or an `Nxx` wildcard band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Exact(u16),
    Range(u16, u16),
}

impl StatusFilter {
    #[must_use]
    pub fn matches(self, code: u16) -> bool {
        match self {
            Self::Exact(target) => code == target,
            Self::Range(low, high) => code >= low && code <= high,
        }
    }
}

/// Parse a status filter token: `"404"`, `"4xx"`, or `"200-299"`.
///
/// An unparsable token yields `Exact(0)`, which matches nothing — the same
/// "invalid filter matches nothing" policy the reference CLI used.
#[must_use]
pub fn parse_status_filter(token: &str) -> StatusFilter {
    let lower = token.to_lowercase();

    if let Some((low, high)) = lower.split_once('-') {
        if let (Ok(low), Ok(high)) = (low.parse::<u16>(), high.parse::<u16>()) {
            return StatusFilter::Range(low, high);
        }
    }

    if lower.len() == 3 && lower.ends_with("xx") {
        if let Some(digit) = lower.chars().next().and_then(|c| c.to_digit(10)) {
            #[allow(clippy::cast_possible_truncation)]
            let base = (digit as u16) * 100;
            return StatusFilter::Range(base, base + 99);
        }
    }

    lower
        .parse::<u16>()
        .map_or(StatusFilter::Exact(0), StatusFilter::Exact)
}

/// Parse a comma-separated status filter list; a code matches if any listed
/// filter matches it (values within one kind compose with OR).
#[must_use]
pub fn parse_status_filters(csv: &str) -> Vec<StatusFilter> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_status_filter)
        .collect()
}

#[must_use]
pub fn status_matches_any(filters: &[StatusFilter], code: u16) -> bool {
    filters.iter().any(|f| f.matches(code))
}

/// Parse a comma-separated token set, lowercased and trimmed, for `type`/
/// `method`/`mime` style filters.
#[must_use]
pub fn parse_token_set(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[must_use]
pub fn token_set_contains(tokens: &[String], value: &str) -> bool {
    let lower = value.to_lowercase();
    tokens.iter().any(|t| t == &lower)
}

/// `mime` filter semantics: substring match against each token, OR'd.
#[must_use]
pub fn mime_matches_any(tokens: &[String], mime: &str) -> bool {
    let lower = mime.to_lowercase();
    tokens.iter().any(|t| lower.contains(t.as_str()))
}

/// Compile and run a case-sensitive regex search against `text`.
///
/// # Errors
///
/// Returns `AppError::invalid_argument` if `pattern` is not a valid regex.
pub fn regex_search(pattern: &str, text: &str) -> Result<bool, AppError> {
    let re = Regex::new(pattern)
        .map_err(|e| AppError::invalid_argument(format!("invalid regex: {e}")))?;
    Ok(re.is_match(text))
}

/// A mutually-exclusive tail-of-pipeline slice: head N, tail N, or an
/// inclusive A-B range of 0-based indices into the already-filtered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    Head(usize),
    Tail(usize),
    Range(usize, usize),
}

/// Apply a slice to an already AND/OR-filtered list. Applied last, per the
/// filter-composition rule.
#[must_use]
pub fn apply_slice<T>(items: Vec<T>, slice: Option<Slice>) -> Vec<T> {
    let Some(slice) = slice else {
        return items;
    };
    match slice {
        Slice::Head(n) => items.into_iter().take(n).collect(),
        Slice::Tail(n) => {
            let len = items.len();
            let skip = len.saturating_sub(n);
            items.into_iter().skip(skip).collect()
        }
        Slice::Range(a, b) => {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            items
                .into_iter()
                .enumerate()
                .filter(|(i, _)| *i >= lo && *i <= hi)
                .map(|(_, v)| v)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_filter_exact() {
        assert_eq!(parse_status_filter("404"), StatusFilter::Exact(404));
    }

    #[test]
    fn parse_status_filter_wildcard_4xx() {
        assert_eq!(parse_status_filter("4xx"), StatusFilter::Range(400, 499));
    }

    #[test]
    fn parse_status_filter_wildcard_5xx() {
        assert_eq!(parse_status_filter("5xx"), StatusFilter::Range(500, 599));
    }

    #[test]
    fn parse_status_filter_range() {
        assert_eq!(parse_status_filter("200-299"), StatusFilter::Range(200, 299));
    }

    #[test]
    fn parse_status_filter_invalid_matches_nothing() {
        let f = parse_status_filter("nope");
        assert!(!f.matches(0));
        assert!(!f.matches(200));
    }

    #[test]
    fn status_matches_any_ors_across_values() {
        let filters = parse_status_filters("404,5xx");
        assert!(status_matches_any(&filters, 404));
        assert!(status_matches_any(&filters, 503));
        assert!(!status_matches_any(&filters, 200));
    }

    #[test]
    fn token_set_contains_is_case_insensitive() {
        let tokens = parse_token_set("Error,Warning");
        assert!(token_set_contains(&tokens, "error"));
        assert!(token_set_contains(&tokens, "WARNING"));
        assert!(!token_set_contains(&tokens, "info"));
    }

    #[test]
    fn mime_matches_any_is_substring() {
        let tokens = parse_token_set("json");
        assert!(mime_matches_any(&tokens, "application/json; charset=utf-8"));
        assert!(!mime_matches_any(&tokens, "text/html"));
    }

    #[test]
    fn regex_search_matches_and_rejects_invalid() {
        assert!(regex_search(r"/api/\d+", "https://x/api/42").unwrap());
        assert!(!regex_search(r"/api/\d+", "https://x/home").unwrap());
        assert!(regex_search("(", "anything").is_err());
    }

    #[test]
    fn apply_slice_head() {
        let items = vec![1, 2, 3, 4, 5];
        assert_eq!(apply_slice(items, Some(Slice::Head(2))), vec![1, 2]);
    }

    #[test]
    fn apply_slice_tail() {
        let items = vec![1, 2, 3, 4, 5];
        assert_eq!(apply_slice(items, Some(Slice::Tail(2))), vec![4, 5]);
    }

    #[test]
    fn apply_slice_tail_longer_than_input() {
        let items = vec![1, 2];
        assert_eq!(apply_slice(items, Some(Slice::Tail(10))), vec![1, 2]);
    }

    #[test]
    fn apply_slice_range_inclusive() {
        let items = vec![1, 2, 3, 4, 5];
        assert_eq!(apply_slice(items, Some(Slice::Range(1, 3))), vec![2, 3, 4]);
    }

    #[test]
    fn apply_slice_none_is_identity() {
        let items = vec![1, 2, 3];
        assert_eq!(apply_slice(items.clone(), None), items);
    }
}
