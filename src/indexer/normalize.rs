//! Normalization helpers shared by the indexer and the filter builder

use chrono::DateTime;
use regex::Regex;
use std::sync::OnceLock;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Collapse runs of whitespace and trim
pub fn norm_text(s: &str) -> String {
    whitespace_re().replace_all(s.trim(), " ").into_owned()
}

/// Normalized match key: collapsed whitespace, lowercased
pub fn norm_key(s: &str) -> String {
    norm_text(s).to_lowercase()
}

/// Parse the comma-separated subtopic column into
/// `(topics, topics_norm, subtopic_raw)`
pub fn parse_topics(subtopic: &str) -> (Vec<String>, Vec<String>, String) {
    let raw = norm_text(subtopic);
    let mut parts: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        parts.push("unknown".to_string());
    }
    let norm = parts.iter().map(|p| p.to_lowercase()).collect();
    (parts, norm, raw)
}

/// Reduce a publication timestamp to its YYYY-MM-DD day. Falls back to the
/// first 10 characters when the value does not parse as ISO-8601.
pub fn to_pub_day(pub_date: &str) -> String {
    let candidate = pub_date.trim().replace('Z', "+00:00");
    if let Ok(dt) = DateTime::parse_from_rfc3339(&candidate) {
        return dt.date_naive().to_string();
    }
    let chars: Vec<char> = pub_date.trim().chars().collect();
    if chars.len() >= 10 {
        chars[..10].iter().collect()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(norm_text("  a\t b \n c  "), "a b c");
        assert_eq!(norm_key(" Ivan  PETROV "), "ivan petrov");
    }

    #[test]
    fn topics_are_split_and_normalized() {
        let (topics, norm, raw) = parse_topics(" AI , ML,, Robotics ");
        assert_eq!(topics, vec!["AI", "ML", "Robotics"]);
        assert_eq!(norm, vec!["ai", "ml", "robotics"]);
        assert_eq!(raw, "AI , ML,, Robotics");
    }

    #[test]
    fn empty_topics_become_unknown() {
        let (topics, norm, _) = parse_topics("  ");
        assert_eq!(topics, vec!["unknown"]);
        assert_eq!(norm, vec!["unknown"]);
    }

    #[test]
    fn pub_day_from_iso_timestamp() {
        assert_eq!(to_pub_day("2024-03-05T12:30:00Z"), "2024-03-05");
        assert_eq!(to_pub_day("2024-03-05T12:30:00+03:00"), "2024-03-05");
    }

    #[test]
    fn pub_day_falls_back_to_prefix() {
        assert_eq!(to_pub_day("2024-03-05 не дата"), "2024-03-05");
        assert_eq!(to_pub_day("кратко"), "");
    }
}
