use crate::collector::{Collector, QuerySource};
use std::time::Duration;

/// One finished database call as reported by a driver hook
#[derive(Debug, Clone, Default)]
pub struct QueryObservation<'a> {
    /// Operation name (e.g. `query`, `exec`), used when the SQL text is empty
    pub operation: &'a str,
    pub sql: &'a str,
    pub connection: &'a str,
    pub duration: Duration,
    pub model: &'a str,
    pub file: &'a str,
    pub line: u32,
}

/// Records database calls into the request collector, flagging slow ones
#[derive(Debug, Clone, Copy)]
pub struct SqlObserver {
    slow_query_threshold: Duration,
}

impl SqlObserver {
    pub fn new(slow_query_threshold: Duration) -> Self {
        Self {
            slow_query_threshold,
        }
    }

    pub fn is_slow(&self, duration: Duration) -> bool {
        duration > self.slow_query_threshold
    }

    #[track_caller]
    pub fn on_query(&self, collector: Option<&Collector>, observation: QueryObservation<'_>) {
        let Some(collector) = collector else {
            return;
        };

        let query = if observation.sql.trim().is_empty() {
            observation.operation
        } else {
            observation.sql
        };
        let connection = if observation.connection.is_empty() {
            "sql"
        } else {
            observation.connection
        };

        collector.add_database_query_detailed(
            query,
            observation.duration,
            connection,
            self.is_slow(observation.duration),
            QuerySource {
                model: observation.model,
                file: observation.file,
                line: observation.line,
            },
        );
    }
}
