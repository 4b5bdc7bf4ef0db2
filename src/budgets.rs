//! Per-request resource budgets
//!
//! Budgets are derived once from [`ProfilerConfig`] and copied into every
//! collector. A count cap or byte budget of zero means "unlimited"; the string
//! length limit falls back to [`DEFAULT_MAX_STRING_LENGTH`] instead.

use crate::config::{ProfilerConfig, DEFAULT_MAX_STRING_LENGTH};

/// Drop-counter key for records rejected by the byte budget
pub const DROP_PAYLOAD: &str = "payload";
/// Drop-counter key for truncated strings
pub const DROP_STRINGS: &str = "strings";
/// Drop-counter key for log context fields beyond the per-entry cap
pub const DROP_LOG_CONTEXT: &str = "log_context";

/// Context fields kept per log entry
pub const MAX_LOG_CONTEXT_FIELDS: usize = 20;

/// Record kinds with their own count cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Database,
    Cache,
    Logs,
    Timeline,
}

impl Category {
    /// Drop-counter key for this category
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Logs => "logs",
            Self::Timeline => "timeline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudgets {
    pub max_request_bytes: usize,
    pub max_string_length: usize,
    pub max_database_queries: usize,
    pub max_cache_queries: usize,
    pub max_log_entries: usize,
    pub max_timeline_events: usize,
}

impl Default for ResourceBudgets {
    fn default() -> Self {
        Self {
            max_request_bytes: 0,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            max_database_queries: 0,
            max_cache_queries: 0,
            max_log_entries: 0,
            max_timeline_events: 0,
        }
    }
}

impl ResourceBudgets {
    pub fn from_config(config: &ProfilerConfig) -> Self {
        Self {
            max_request_bytes: config.max_request_payload_bytes,
            max_string_length: config.max_string_length,
            max_database_queries: config.max_database_queries,
            max_cache_queries: config.max_cache_queries,
            max_log_entries: config.max_log_entries,
            max_timeline_events: config.max_timeline_events,
        }
        .normalized()
    }

    /// Effective string limit, never zero
    pub fn string_limit(&self) -> usize {
        if self.max_string_length == 0 {
            DEFAULT_MAX_STRING_LENGTH
        } else {
            self.max_string_length
        }
    }

    /// Count cap for a category, zero meaning unlimited
    pub fn cap(&self, category: Category) -> usize {
        match category {
            Category::Database => self.max_database_queries,
            Category::Cache => self.max_cache_queries,
            Category::Logs => self.max_log_entries,
            Category::Timeline => self.max_timeline_events,
        }
    }

    fn normalized(mut self) -> Self {
        self.max_string_length = self.string_limit();
        self
    }
}
