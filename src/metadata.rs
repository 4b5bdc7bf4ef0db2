//! Finished request records
//!
//! A [`Metadata`] is produced exactly once per captured request, when the
//! request completes, and is never mutated afterwards. Its serde shape is the
//! storage and wire format read by debugging UIs:
//! - durations are milliseconds (`f64`)
//! - timestamps are fractional Unix seconds (`f64`)
//! - empty optional fields are omitted

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Version of the persisted record layout
pub const SCHEMA_VERSION: u32 = 1;

/// Closed set of values accepted for log context and user data
///
/// Strings, integers, floats and booleans pass through unchanged. Anything
/// else is rendered to text by the caller and carried as [`FieldValue::Other`].
///
/// The JSON form is untagged, so `Other` reads back as `Str` and unsigned
/// values that fit an `i64` read back as `Int`. Equality follows the JSON
/// form: text compares by content and integers by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Other(String),
}

impl FieldValue {
    /// Render an arbitrary value through its `Display` impl
    pub fn display(value: impl fmt::Display) -> Self {
        Self::Other(value.to_string().trim().to_string())
    }

    /// Render an arbitrary value through its `Debug` impl
    pub fn debug(value: &dyn fmt::Debug) -> Self {
        Self::Other(format!("{:?}", value).trim().to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Other(s) => Some(s),
            _ => None,
        }
    }

    fn as_integer(&self) -> Option<i128> {
        match self {
            Self::Int(n) => Some(i128::from(*n)),
            Self::UInt(n) => Some(i128::from(*n)),
            _ => None,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (self.as_str(), other.as_str()) {
            return a == b;
        }
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(n) => Self::Int(n),
            Err(_) => Self::UInt(value),
        }
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        Self::from(value as u64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        Self::Float(value as f64)
    }
}

/// Immutable record of one captured request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Metadata {
    pub id: String,
    pub version: u32,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Request start (Unix seconds)
    pub time: f64,
    /// Response stamp (Unix seconds)
    pub response_time: f64,
    pub response_status: u16,
    /// Response duration (milliseconds)
    pub response_duration: f64,

    pub method: String,
    pub uri: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub controller: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub span_id: String,

    pub database_queries: Vec<DatabaseQuery>,
    pub database_queries_count: usize,
    /// Sum of all database query durations (milliseconds)
    pub database_duration: f64,

    pub cache_queries: Vec<CacheQuery>,
    #[serde(rename = "log")]
    pub log_entries: Vec<LogEntry>,
    #[serde(rename = "timelineData")]
    pub timeline_events: Vec<TimelineEvent>,

    /// Process memory growth over the request (bytes, floored at zero)
    pub memory_usage: u64,
    #[serde(skip_serializing_if = "is_false")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dropped: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub user_data: BTreeMap<String, FieldValue>,
}

impl Metadata {
    /// Bare record with an id, mostly useful for storage tests and fixtures
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: SCHEMA_VERSION,
            kind: "request".to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseQuery {
    pub query: String,
    pub duration: f64,
    pub connection: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub line: u32,
    pub slow: bool,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheQuery {
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
    pub duration: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, FieldValue>,
    #[serde(rename = "time")]
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<StackFrame>,
}

/// One resolved call-stack frame attached to a log entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StackFrame {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub call: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub line: u32,
    pub is_vendor: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineEvent {
    pub name: String,
    pub description: String,
    pub start: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub color: String,
}

/// Convert a wall-clock instant to fractional Unix seconds
pub fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Current time as fractional Unix seconds
pub fn now_unix_seconds() -> f64 {
    unix_seconds(SystemTime::now())
}

/// Duration in milliseconds with microsecond precision
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}
