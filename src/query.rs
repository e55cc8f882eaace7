//! Field-path queries over JSON records
//!
//! A query spec is `{PATH}={REGEXP}`. The path walks the record: dotted
//! segments select object fields, numeric segments index arrays, `#` fans
//! out over an array, and any other segment applied to an array fans out
//! implicitly. A spec matches when at least one extracted value, in string
//! form, matches its pattern. A missing field extracts nothing and so does
//! not match; it is never an error.

use crate::error::{ConfigError, ConfigResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// How the specs of a set combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryMode {
    /// Every spec must match
    #[default]
    All,
    /// At least one spec must match
    Any,
}

impl FromStr for QueryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(QueryMode::All),
            "ANY" => Ok(QueryMode::Any),
            _ => Err(ConfigError::InvalidQueryMode(s.to_string())),
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::All => write!(f, "ALL"),
            QueryMode::Any => write!(f, "ANY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Object field, or array index when numeric
    Field(String),
    /// `#`: every element of an array
    Each,
}

/// A parsed field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => current.push('\\'),
                },
                '.' => segments.push(Self::segment(std::mem::take(&mut current))),
                _ => current.push(c),
            }
        }
        segments.push(Self::segment(current));

        Some(FieldPath {
            raw: raw.to_string(),
            segments,
        })
    }

    fn segment(text: String) -> Segment {
        if text == "#" {
            Segment::Each
        } else {
            Segment::Field(text)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Every value the path reaches in `record`
    pub fn extract<'v>(&self, record: &'v Value) -> Vec<&'v Value> {
        let mut out = Vec::new();
        collect(record, &self.segments, &mut out);
        out
    }
}

fn collect<'v>(value: &'v Value, segments: &[Segment], out: &mut Vec<&'v Value>) {
    let Some((first, rest)) = segments.split_first() else {
        match value {
            Value::Array(items) => out.extend(items.iter()),
            other => out.push(other),
        }
        return;
    };

    match (first, value) {
        (Segment::Each, Value::Array(items)) => {
            for item in items {
                collect(item, rest, out);
            }
        }
        (Segment::Field(name), Value::Object(map)) => {
            if let Some(child) = map.get(name) {
                collect(child, rest, out);
            }
        }
        (Segment::Field(name), Value::Array(items)) => match name.parse::<usize>() {
            Ok(index) => {
                if let Some(child) = items.get(index) {
                    collect(child, rest, out);
                }
            }
            Err(_) => {
                for item in items {
                    collect(item, segments, out);
                }
            }
        },
        _ => {}
    }
}

/// String form a pattern is matched against
pub fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// One `{PATH}={REGEXP}` test
#[derive(Debug, Clone)]
pub struct QuerySpec {
    path: FieldPath,
    pattern: Regex,
}

impl QuerySpec {
    pub fn new(path: &str, pattern: &str) -> ConfigResult<Self> {
        let path = FieldPath::parse(path).ok_or_else(|| ConfigError::InvalidQuery {
            spec: format!("{}={}", path, pattern),
        })?;
        let pattern = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(QuerySpec { path, pattern })
    }

    /// Parse `{PATH}={REGEXP}`, splitting on the first `=`
    pub fn parse(spec: &str) -> ConfigResult<Self> {
        let (path, pattern) = spec.split_once('=').ok_or_else(|| ConfigError::InvalidQuery {
            spec: spec.to_string(),
        })?;
        Self::new(path, pattern)
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.path
            .extract(record)
            .into_iter()
            .any(|v| self.pattern.is_match(&value_string(v)))
    }
}

impl FromStr for QuerySpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Specs combined under a mode
#[derive(Debug, Clone, Default)]
pub struct QuerySet {
    specs: Vec<QuerySpec>,
    mode: QueryMode,
}

impl QuerySet {
    pub fn new(specs: Vec<QuerySpec>, mode: QueryMode) -> Self {
        QuerySet { specs, mode }
    }

    pub fn parse<S: AsRef<str>>(specs: &[S], mode: QueryMode) -> ConfigResult<Self> {
        let specs = specs
            .iter()
            .map(|s| QuerySpec::parse(s.as_ref()))
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self::new(specs, mode))
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn specs(&self) -> &[QuerySpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// An empty set matches everything
    pub fn matches(&self, record: &Value) -> bool {
        if self.specs.is_empty() {
            return true;
        }
        match self.mode {
            QueryMode::All => self.specs.iter().all(|s| s.matches(record)),
            QueryMode::Any => self.specs.iter().any(|s| s.matches(record)),
        }
    }

    /// Match a raw JSON body; a body that does not parse matches nothing
    pub fn matches_bytes(&self, body: &[u8]) -> bool {
        if self.specs.is_empty() {
            return true;
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(record) => self.matches(&record),
            Err(_) => false,
        }
    }
}
