//! Index patterns and their resolution to concrete backing indices

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::time::{floor, shift, TimeUnit};

/// Partitioning interval of a time-based index pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexInterval {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl IndexInterval {
    fn unit(&self) -> TimeUnit {
        match self {
            IndexInterval::Hourly => TimeUnit::Hour,
            IndexInterval::Daily => TimeUnit::Day,
            IndexInterval::Weekly => TimeUnit::Week,
            IndexInterval::Monthly => TimeUnit::Month,
            IndexInterval::Yearly => TimeUnit::Year,
        }
    }
}

/// Index pattern as stored by the saved-object layer.
///
/// When `interval` is set, `title` is a name template such as
/// `[logs-]YYYY.MM.DD`: bracketed text is literal, the rest are date tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPattern {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<IndexInterval>,
}

impl IndexPattern {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            time_field: None,
            interval: None,
        }
    }

    pub fn with_time_field(mut self, field: impl Into<String>) -> Self {
        self.time_field = Some(field.into());
        self
    }

    pub fn with_interval(mut self, title: impl Into<String>, interval: IndexInterval) -> Self {
        self.title = title.into();
        self.interval = Some(interval);
        self
    }

    /// Wildcard form of the title, used when no time range narrows it down.
    pub fn wildcard(&self) -> String {
        if self.interval.is_none() {
            return self.title.clone();
        }
        let mut out = String::new();
        for segment in template_segments(&self.title) {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Format(_) => {
                    if !out.ends_with('*') {
                        out.push('*');
                    }
                }
            }
        }
        out
    }

    fn format_at(&self, at: DateTime<Utc>) -> String {
        let mut out = String::new();
        for segment in template_segments(&self.title) {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Format(tokens) => {
                    let fmt = moment_to_strftime(tokens);
                    out.push_str(&at.format(&fmt).to_string());
                }
            }
        }
        out
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Format(&'a str),
}

fn template_segments(title: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = title;
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('[') {
            match stripped.find(']') {
                Some(end) => {
                    segments.push(Segment::Literal(&stripped[..end]));
                    rest = &stripped[end + 1..];
                }
                None => {
                    segments.push(Segment::Literal(stripped));
                    rest = "";
                }
            }
        } else {
            let end = rest.find('[').unwrap_or(rest.len());
            segments.push(Segment::Format(&rest[..end]));
            rest = &rest[end..];
        }
    }
    segments
}

fn moment_to_strftime(tokens: &str) -> String {
    tokens
        .replace("YYYY", "%Y")
        .replace("GGGG", "%G")
        .replace("MM", "%m")
        .replace("DD", "%d")
        .replace("WW", "%V")
        .replace("HH", "%H")
}

/// Turns an index pattern id into the concrete indices a query should hit.
pub trait IndexResolver {
    fn resolve(
        &self,
        index_pattern: &str,
        time: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<String>>;

    /// Time field of the pattern, when it is time based.
    fn time_field(&self, _index_pattern: &str) -> Option<String> {
        None
    }
}

/// Resolver that uses pattern ids as index names unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityIndexResolver;

impl IndexResolver for IdentityIndexResolver {
    fn resolve(
        &self,
        index_pattern: &str,
        _time: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<String>> {
        Ok(vec![index_pattern.to_string()])
    }
}

/// Resolver backed by the known index patterns.
#[derive(Debug, Clone)]
pub struct PatternIndexResolver {
    patterns: HashMap<String, IndexPattern>,
    max_indices: usize,
}

impl PatternIndexResolver {
    pub const DEFAULT_MAX_INDICES: usize = 512;

    pub fn new(patterns: impl IntoIterator<Item = IndexPattern>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| (p.id.clone(), p)).collect(),
            max_indices: Self::DEFAULT_MAX_INDICES,
        }
    }

    /// Above this many concrete indices the wildcard is used instead.
    pub fn with_max_indices(mut self, max_indices: usize) -> Self {
        self.max_indices = max_indices.max(1);
        self
    }

    pub fn pattern(&self, id: &str) -> Option<&IndexPattern> {
        self.patterns.get(id)
    }
}

impl IndexResolver for PatternIndexResolver {
    fn resolve(
        &self,
        index_pattern: &str,
        time: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<String>> {
        let pattern = self
            .patterns
            .get(index_pattern)
            .ok_or_else(|| CoreError::UnknownIndexPattern {
                id: index_pattern.to_string(),
            })?;

        let (Some(interval), Some((from, to))) = (pattern.interval, time) else {
            return Ok(vec![pattern.wildcard()]);
        };

        let unit = interval.unit();
        let mut names = BTreeSet::new();
        let mut cursor = floor(from, unit);
        while let Some(at) = cursor {
            if at > to {
                break;
            }
            names.insert(pattern.format_at(at));
            if names.len() > self.max_indices {
                return Ok(vec![pattern.wildcard()]);
            }
            cursor = shift(at, unit, 1);
        }

        if names.is_empty() {
            return Ok(vec![pattern.wildcard()]);
        }
        Ok(names.into_iter().collect())
    }

    fn time_field(&self, index_pattern: &str) -> Option<String> {
        self.patterns
            .get(index_pattern)
            .and_then(|p| p.time_field.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn daily() -> IndexPattern {
        IndexPattern::new("logs")
            .with_time_field("@timestamp")
            .with_interval("[logs-]YYYY.MM.DD", IndexInterval::Daily)
    }

    #[test]
    fn test_wildcard_form() {
        assert_eq!(daily().wildcard(), "logs-*");
        assert_eq!(IndexPattern::new("companies").wildcard(), "companies");
    }

    #[test]
    fn test_resolve_daily_range() {
        let resolver = PatternIndexResolver::new(vec![daily()]);
        let from = Utc.with_ymd_and_hms(2024, 2, 28, 10, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();
        let indices = resolver.resolve("logs", Some((from, to))).unwrap();
        assert_eq!(
            indices,
            vec!["logs-2024.02.28", "logs-2024.02.29", "logs-2024.03.01"]
        );
        assert_eq!(resolver.time_field("logs").as_deref(), Some("@timestamp"));
    }

    #[test]
    fn test_resolve_falls_back_to_wildcard() {
        let resolver = PatternIndexResolver::new(vec![daily()]).with_max_indices(2);
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(
            resolver.resolve("logs", Some((from, to))).unwrap(),
            vec!["logs-*"]
        );
        assert_eq!(resolver.resolve("logs", None).unwrap(), vec!["logs-*"]);
    }

    #[test]
    fn test_unknown_pattern_is_an_error() {
        let resolver = PatternIndexResolver::new(Vec::new());
        assert!(resolver.resolve("nope", None).is_err());
        assert_eq!(
            IdentityIndexResolver.resolve("nope", None).unwrap(),
            vec!["nope"]
        );
    }
}
