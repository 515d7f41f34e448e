// src/db/recorder.rs

//! Query recorder: a bounded ring of recent statement timings plus a
//! fire-and-forget event-subscriber list.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

/// Derived operation kind for a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Query,
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationType::Query => "query",
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// One recorded statement.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub sql: String,
    pub operation: OperationType,
    pub table: Option<String>,
    pub affected_rows: usize,
    pub duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

/// Threshold above which a query counts as "slow" for the metrics view.
pub const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(100);

/// Maximum number of records kept in the ring.
pub const RING_CAPACITY: usize = 1000;

type Subscriber = Box<dyn Fn(OperationType, Option<&str>, usize, Duration) + Send + Sync>;

struct Inner {
    ring: VecDeque<QueryRecord>,
    subscribers: Vec<Subscriber>,
}

/// Process-wide-per-driver recorder. Shared state is guarded by a single
/// lock rather than made lock-free — the pack's usual choice
/// for this shape of workload.
pub struct QueryRecorder {
    inner: Mutex<Inner>,
}

impl Default for QueryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRecorder {
    pub fn new() -> Self {
        QueryRecorder {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(RING_CAPACITY),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Register a subscriber. Exceptions raised inside it are caught,
    /// logged, and discarded — they must never affect the calling
    /// statement.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(OperationType, Option<&str>, usize, Duration) + Send + Sync + 'static,
    {
        self.inner.lock().subscribers.push(Box::new(callback));
    }

    pub fn record(
        &self,
        sql: &str,
        (operation, table): (OperationType, Option<String>),
        affected_rows: usize,
        duration: Duration,
    ) {
        let mut inner = self.inner.lock();
        if inner.ring.len() >= RING_CAPACITY {
            inner.ring.pop_front();
        }
        inner.ring.push_back(QueryRecord {
            sql: sql.to_string(),
            operation,
            table: table.clone(),
            affected_rows,
            duration,
            recorded_at: Utc::now(),
        });

        for subscriber in &inner.subscribers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                subscriber(operation, table.as_deref(), affected_rows, duration);
            }));
            if result.is_err() {
                warn!("query recorder subscriber panicked; discarding");
            }
        }
    }

    /// Snapshot of the current ring, oldest first.
    pub fn records(&self) -> Vec<QueryRecord> {
        self.inner.lock().ring.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Average execution time and the 10 slowest statements at or above
    /// [`SLOW_QUERY_THRESHOLD`].
    pub fn metrics(&self) -> RecorderMetrics {
        let records = self.inner.lock().ring.clone();
        if records.is_empty() {
            return RecorderMetrics {
                average: Duration::ZERO,
                slowest: Vec::new(),
                total_recorded: 0,
            };
        }

        let total: Duration = records.iter().map(|r| r.duration).sum();
        let average = total / records.len() as u32;

        let mut slow: Vec<QueryRecord> = records
            .iter()
            .filter(|r| r.duration >= SLOW_QUERY_THRESHOLD)
            .cloned()
            .collect();
        slow.sort_by(|a, b| b.duration.cmp(&a.duration));
        slow.truncate(10);

        RecorderMetrics {
            average,
            slowest: slow,
            total_recorded: records.len(),
        }
    }
}

/// Aggregate view over the recorder's current ring.
#[derive(Debug, Clone)]
pub struct RecorderMetrics {
    pub average: Duration,
    pub slowest: Vec<QueryRecord>,
    pub total_recorded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        let recorder = QueryRecorder::new();
        for i in 0..(RING_CAPACITY + 10) {
            recorder.record(
                "SELECT 1",
                (OperationType::Query, None),
                1,
                Duration::from_millis(i as u64 % 5),
            );
        }
        assert_eq!(recorder.len(), RING_CAPACITY);
    }

    #[test]
    fn metrics_finds_slow_queries() {
        let recorder = QueryRecorder::new();
        recorder.record("fast", (OperationType::Query, None), 1, Duration::from_millis(1));
        recorder.record(
            "slow",
            (OperationType::Query, Some("nodes".to_string())),
            1,
            Duration::from_millis(150),
        );
        let metrics = recorder.metrics();
        assert_eq!(metrics.slowest.len(), 1);
        assert_eq!(metrics.slowest[0].sql, "slow");
    }

    #[test]
    fn subscriber_panic_is_swallowed() {
        let recorder = QueryRecorder::new();
        recorder.subscribe(|_, _, _, _| panic!("boom"));
        // Must not propagate.
        recorder.record("SELECT 1", (OperationType::Query, None), 0, Duration::ZERO);
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn subscriber_receives_event() {
        let recorder = QueryRecorder::new();
        let seen = std::sync::Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        recorder.subscribe(move |op, table, rows, _dur| {
            *seen_clone.lock() = Some((op, table.map(str::to_string), rows));
        });
        recorder.record(
            "INSERT INTO nodes (id) VALUES (?1)",
            (OperationType::Insert, Some("nodes".to_string())),
            1,
            Duration::from_millis(1),
        );
        let value = seen.lock().clone();
        assert_eq!(value, Some((OperationType::Insert, Some("nodes".to_string()), 1)));
    }
}
