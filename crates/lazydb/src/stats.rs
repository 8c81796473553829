//! Query statistics.
//!
//! [`QueryStats`] is the single bookkeeping point for one connection: every
//! direct query and every prepared-statement execution ends up here as a
//! [`QueryRecord`], whether it succeeded or failed.
//!
//! Records are appended to the query log in execution order. Records whose
//! duration meets or exceeds the slow-query threshold are also appended to
//! the slow-query log at insertion time; the threshold is never re-applied
//! to old records.
//!
//! The recorder is shared between a connection and its prepared statements
//! through an `Arc`, and guards its state with a mutex so a stats handle can
//! be inspected from another thread.

use lazydb_core::Params;
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::DEFAULT_SLOW_QUERY_THRESHOLD;

/// How a query reached the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// `exec` or `query` on the connection
    Direct,
    /// `execute` on a prepared statement
    Prepared,
}

impl QueryKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            QueryKind::Direct => "direct",
            QueryKind::Prepared => "prepared",
        }
    }
}

/// Outcome of a recorded query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryState {
    Success,
    Error,
}

/// Source location of the code that issued a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One executed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub state: QueryState,
    pub kind: QueryKind,
    /// SQL text as given by the caller
    pub query: String,
    /// Parameters supplied to a prepared execution
    pub params: Option<Params>,
    /// Elapsed wall time of the driver call
    pub duration: Duration,
    /// Time since the recorder was created, taken when the call finished
    pub timestamp: Duration,
    /// Where the query was issued from, when call-site capture is on
    pub call_site: Option<CallSite>,
}

impl QueryRecord {
    /// Duration in seconds with 8 decimal places.
    pub fn time(&self) -> String {
        format_secs(self.duration)
    }

    pub fn is_error(&self) -> bool {
        self.state == QueryState::Error
    }
}

impl Serialize for QueryRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("QueryRecord", 8)?;
        s.serialize_field("type", &self.kind)?;
        s.serialize_field("state", &self.state)?;
        s.serialize_field("query", &self.query)?;
        s.serialize_field("params", &self.params)?;
        s.serialize_field("time", &self.time())?;
        s.serialize_field("duration", &self.duration.as_secs_f64())?;
        s.serialize_field("timestamp", &self.timestamp.as_secs_f64())?;
        s.serialize_field("call_site", &self.call_site)?;
        s.end()
    }
}

fn format_secs(duration: Duration) -> String {
    format!("{:.8}", duration.as_secs_f64())
}

#[derive(Debug, Default)]
struct StatsInner {
    direct_count: u64,
    prepared_count: u64,
    error_count: u64,
    total_time: Duration,
    queries: Vec<Arc<QueryRecord>>,
    slow_queries: Vec<Arc<QueryRecord>>,
}

/// Per-connection query recorder.
#[derive(Debug)]
pub struct QueryStats {
    started: Instant,
    slow_query_threshold: Duration,
    capture_call_sites: bool,
    inner: Mutex<StatsInner>,
}

impl Default for QueryStats {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_QUERY_THRESHOLD, false)
    }
}

impl QueryStats {
    /// Create an empty recorder. Relative timestamps start now.
    pub fn new(slow_query_threshold: Duration, capture_call_sites: bool) -> Self {
        Self {
            started: Instant::now(),
            slow_query_threshold,
            capture_call_sites,
            inner: Mutex::new(StatsInner::default()),
        }
    }

    pub fn slow_query_threshold(&self) -> Duration {
        self.slow_query_threshold
    }

    pub fn captures_call_sites(&self) -> bool {
        self.capture_call_sites
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        // A panic while holding the lock leaves plain counters behind
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a query that started at `start` and finished now.
    ///
    /// With call-site capture enabled, the location recorded is the caller of
    /// this method (or of the nearest `#[track_caller]` function above it).
    #[track_caller]
    pub fn record_query(
        &self,
        kind: QueryKind,
        query: &str,
        params: Option<&Params>,
        start: Instant,
        is_error: bool,
    ) {
        let state = if is_error {
            QueryState::Error
        } else {
            QueryState::Success
        };
        self.record_at(kind, query, params, start, state, Location::caller());
    }

    pub(crate) fn record_at(
        &self,
        kind: QueryKind,
        query: &str,
        params: Option<&Params>,
        start: Instant,
        state: QueryState,
        location: &'static Location<'static>,
    ) {
        let now = Instant::now();
        let record = Arc::new(QueryRecord {
            state,
            kind,
            query: query.to_string(),
            params: params.cloned(),
            duration: now.saturating_duration_since(start),
            timestamp: now.saturating_duration_since(self.started),
            call_site: self.capture_call_sites.then(|| CallSite::from(location)),
        });
        let slow = record.duration >= self.slow_query_threshold;

        tracing::trace!(
            target: "lazydb::stats",
            kind = kind.as_str(),
            sql = query,
            time = %record.time(),
            "query recorded"
        );
        if record.is_error() {
            tracing::debug!(target: "lazydb::stats", kind = kind.as_str(), sql = query, "query failed");
        }
        if slow {
            tracing::warn!(
                target: "lazydb::stats",
                sql = query,
                time = %record.time(),
                threshold = %format_secs(self.slow_query_threshold),
                call_site = ?record.call_site,
                "slow query"
            );
        }

        let mut inner = self.lock();
        match kind {
            QueryKind::Prepared => inner.prepared_count += 1,
            QueryKind::Direct => inner.direct_count += 1,
        }
        if record.is_error() {
            inner.error_count += 1;
        }
        inner.total_time += record.duration;
        if slow {
            inner.slow_queries.push(Arc::clone(&record));
        }
        inner.queries.push(record);
    }

    /// Number of direct queries (`exec` / `query`).
    pub fn direct_count(&self) -> u64 {
        self.lock().direct_count
    }

    /// Number of prepared-statement executions.
    pub fn prepared_count(&self) -> u64 {
        self.lock().prepared_count
    }

    pub fn total_count(&self) -> u64 {
        let inner = self.lock();
        inner.direct_count + inner.prepared_count
    }

    /// Number of records with state=error.
    pub fn error_count(&self) -> u64 {
        self.lock().error_count
    }

    /// Sum of all recorded durations.
    pub fn total_query_time(&self) -> Duration {
        self.lock().total_time
    }

    /// Mean duration per query, zero when nothing was recorded.
    pub fn average_query_time(&self) -> Duration {
        let inner = self.lock();
        let count = inner.direct_count + inner.prepared_count;
        match u32::try_from(count) {
            Ok(0) => Duration::ZERO,
            Ok(n) => inner.total_time / n,
            Err(_) => Duration::from_secs_f64(inner.total_time.as_secs_f64() / count as f64),
        }
    }

    /// Full query log in execution order.
    pub fn queries(&self) -> Vec<Arc<QueryRecord>> {
        self.lock().queries.clone()
    }

    /// Queries whose duration met the threshold when they were recorded.
    pub fn slow_queries(&self) -> Vec<Arc<QueryRecord>> {
        self.lock().slow_queries.clone()
    }

    pub fn last_query(&self) -> Option<Arc<QueryRecord>> {
        self.lock().queries.last().cloned()
    }

    /// Clear all counters and both logs.
    pub fn reset(&self) {
        let mut inner = self.lock();
        tracing::debug!(
            target: "lazydb::stats",
            discarded = inner.queries.len(),
            "query stats reset"
        );
        *inner = StatsInner::default();
    }

    /// Consistent copy of all counters and logs.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        let total_count = inner.direct_count + inner.prepared_count;
        let copy = |records: &[Arc<QueryRecord>]| -> Vec<QueryRecord> {
            records.iter().map(|r| QueryRecord::clone(r)).collect()
        };
        StatsSnapshot {
            direct_count: inner.direct_count,
            prepared_count: inner.prepared_count,
            total_count,
            error_count: inner.error_count,
            total_query_time: inner.total_time,
            slow_query_threshold: self.slow_query_threshold,
            queries: copy(&inner.queries),
            slow_queries: copy(&inner.slow_queries),
        }
    }
}

/// Point-in-time view of a [`QueryStats`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub direct_count: u64,
    pub prepared_count: u64,
    pub total_count: u64,
    pub error_count: u64,
    pub total_query_time: Duration,
    pub slow_query_threshold: Duration,
    pub queries: Vec<QueryRecord>,
    pub slow_queries: Vec<QueryRecord>,
}

impl StatsSnapshot {
    pub fn last_query(&self) -> Option<&QueryRecord> {
        self.queries.last()
    }

    pub fn average_query_time(&self) -> Duration {
        if self.total_count == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.total_query_time.as_secs_f64() / self.total_count as f64)
        }
    }
}

impl Serialize for StatsSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("StatsSnapshot", 10)?;
        s.serialize_field("direct_count", &self.direct_count)?;
        s.serialize_field("prepared_count", &self.prepared_count)?;
        s.serialize_field("total_count", &self.total_count)?;
        s.serialize_field("error_count", &self.error_count)?;
        s.serialize_field("total_query_time", &self.total_query_time.as_secs_f64())?;
        s.serialize_field("average_query_time", &self.average_query_time().as_secs_f64())?;
        s.serialize_field("slow_query_threshold", &self.slow_query_threshold.as_secs_f64())?;
        s.serialize_field("queries", &self.queries)?;
        s.serialize_field("slow_queries", &self.slow_queries)?;
        s.serialize_field("last_query", &self.last_query())?;
        s.end()
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} queries ({} direct, {} prepared, {} failed) in {}s, {} slow (>= {}s)",
            self.total_count,
            self.direct_count,
            self.prepared_count,
            self.error_count,
            format_secs(self.total_query_time),
            self.slow_queries.len(),
            format_secs(self.slow_query_threshold),
        )?;
        for record in &self.slow_queries {
            write!(f, "  [{}s] {}", record.time(), record.query)?;
            if let Some(call_site) = record.call_site {
                write!(f, " at {}", call_site)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Scoped timer for one driver call.
///
/// The query is recorded when the timer is dropped. A timer dropped without
/// [`observe`](Self::observe) (for example during unwinding) records an error.
pub(crate) struct QueryTimer<'a> {
    stats: &'a QueryStats,
    kind: QueryKind,
    query: &'a str,
    params: Option<&'a Params>,
    start: Instant,
    location: &'static Location<'static>,
    state: QueryState,
}

impl<'a> QueryTimer<'a> {
    #[track_caller]
    pub(crate) fn start(
        stats: &'a QueryStats,
        kind: QueryKind,
        query: &'a str,
        params: Option<&'a Params>,
    ) -> Self {
        Self {
            stats,
            kind,
            query,
            params,
            location: Location::caller(),
            state: QueryState::Error,
            start: Instant::now(),
        }
    }

    /// Take the outcome of the timed call and hand it back unchanged.
    pub(crate) fn observe<T, E>(mut self, result: Result<T, E>) -> Result<T, E> {
        if result.is_ok() {
            self.state = QueryState::Success;
        }
        result
    }
}

impl Drop for QueryTimer<'_> {
    fn drop(&mut self) {
        self.stats.record_at(
            self.kind,
            self.query,
            self.params,
            self.start,
            self.state,
            self.location,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(ago: Duration) -> Instant {
        Instant::now()
            .checked_sub(ago)
            .expect("monotonic clock is past the offset")
    }

    #[test]
    fn fresh_recorder_is_empty() {
        let stats = QueryStats::default();
        assert_eq!(stats.total_count(), 0);
        assert_eq!(stats.total_query_time(), Duration::ZERO);
        assert_eq!(stats.average_query_time(), Duration::ZERO);
        assert!(stats.queries().is_empty());
        assert!(stats.last_query().is_none());
    }

    #[test]
    fn counts_split_by_kind() {
        let stats = QueryStats::default();
        let now = Instant::now();
        stats.record_query(QueryKind::Direct, "SELECT 1", None, now, false);
        stats.record_query(QueryKind::Direct, "SELECT 2", None, now, true);
        stats.record_query(QueryKind::Prepared, "SELECT ?", Some(&Params::positional([3])), now, false);

        assert_eq!(stats.direct_count(), 2);
        assert_eq!(stats.prepared_count(), 1);
        assert_eq!(stats.total_count(), 3);
        assert_eq!(stats.error_count(), 1);

        let last = stats.last_query().unwrap();
        assert_eq!(last.kind, QueryKind::Prepared);
        assert_eq!(last.params, Some(Params::positional([3])));
    }

    #[test]
    fn slow_log_uses_the_threshold_at_insertion() {
        let stats = QueryStats::new(Duration::from_millis(50), false);
        for ms in [10, 200, 300] {
            stats.record_query(
                QueryKind::Direct,
                &format!("SELECT {}", ms),
                None,
                started(Duration::from_millis(ms)),
                false,
            );
        }

        assert_eq!(stats.queries().len(), 3);
        let slow = stats.slow_queries();
        assert_eq!(slow.len(), 2);
        assert!(slow.iter().all(|r| r.duration >= stats.slow_query_threshold()));
        assert_eq!(slow[0].query, "SELECT 200");

        let total = stats.total_query_time().as_secs_f64();
        assert!((total - 0.51).abs() < 0.05, "total was {}", total);
        let sum: f64 = stats.queries().iter().map(|r| r.duration.as_secs_f64()).sum();
        assert!((total - sum).abs() < 1e-9);
    }

    #[test]
    fn threshold_comparison_is_inclusive() {
        let stats = QueryStats::new(Duration::ZERO, false);
        stats.record_query(QueryKind::Direct, "SELECT 1", None, Instant::now(), false);
        assert_eq!(stats.slow_queries().len(), 1);
    }

    #[test]
    fn slow_records_share_the_logged_record() {
        let stats = QueryStats::new(Duration::ZERO, false);
        stats.record_query(QueryKind::Direct, "SELECT 1", None, Instant::now(), false);
        assert!(Arc::ptr_eq(&stats.queries()[0], &stats.slow_queries()[0]));
    }

    #[test]
    fn time_is_formatted_with_eight_decimals() {
        let stats = QueryStats::default();
        stats.record_query(QueryKind::Direct, "SELECT 1", None, Instant::now(), false);
        let last = stats.last_query().unwrap();
        let time = last.time();
        let (_, decimals) = time.split_once('.').unwrap();
        assert_eq!(decimals.len(), 8);
        let parsed: f64 = time.parse().unwrap();
        assert!((parsed - last.duration.as_secs_f64()).abs() <= 5e-9);
    }

    #[test]
    fn reset_clears_everything() {
        let stats = QueryStats::new(Duration::ZERO, false);
        stats.record_query(QueryKind::Direct, "SELECT 1", None, Instant::now(), true);
        stats.record_query(QueryKind::Prepared, "SELECT 2", None, Instant::now(), false);
        stats.reset();

        assert_eq!(stats.total_count(), 0);
        assert_eq!(stats.error_count(), 0);
        assert_eq!(stats.total_query_time(), Duration::ZERO);
        assert!(stats.queries().is_empty());
        assert!(stats.slow_queries().is_empty());
        assert!(stats.last_query().is_none());
    }

    #[test]
    fn call_sites_point_at_the_caller() {
        let stats = QueryStats::new(Duration::from_secs(1), true);
        let line = line!() + 1;
        stats.record_query(QueryKind::Direct, "SELECT 1", None, Instant::now(), false);

        let site = stats.last_query().unwrap().call_site.unwrap();
        assert!(site.file.ends_with("stats.rs"));
        assert_eq!(site.line, line);

        let quiet = QueryStats::new(Duration::from_secs(1), false);
        quiet.record_query(QueryKind::Direct, "SELECT 1", None, Instant::now(), false);
        assert!(quiet.last_query().unwrap().call_site.is_none());
    }

    #[test]
    fn timer_records_on_every_exit_path() {
        let stats = QueryStats::default();

        let ok: Result<u64, ()> = QueryTimer::start(&stats, QueryKind::Direct, "ok", None).observe(Ok(1));
        assert_eq!(ok, Ok(1));
        assert_eq!(stats.last_query().unwrap().state, QueryState::Success);

        let err: Result<u64, &str> =
            QueryTimer::start(&stats, QueryKind::Direct, "err", None).observe(Err("boom"));
        assert_eq!(err, Err("boom"));
        assert_eq!(stats.last_query().unwrap().state, QueryState::Error);

        drop(QueryTimer::start(&stats, QueryKind::Direct, "abandoned", None));
        let last = stats.last_query().unwrap();
        assert_eq!(last.query, "abandoned");
        assert!(last.is_error());

        assert_eq!(stats.total_count(), 3);
    }

    #[test]
    fn snapshot_serializes_seconds_and_formatted_times() {
        let stats = QueryStats::new(Duration::ZERO, false);
        stats.record_query(
            QueryKind::Prepared,
            "SELECT ?",
            Some(&Params::positional([1])),
            Instant::now(),
            false,
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_count, 1);
        assert_eq!(snapshot.last_query().map(|r| r.query.as_str()), Some("SELECT ?"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["prepared_count"], 1);
        assert_eq!(json["queries"][0]["type"], "prepared");
        assert_eq!(json["queries"][0]["state"], "success");
        assert_eq!(json["queries"][0]["params"], serde_json::json!([{"Int": 1}]));
        assert!(json["queries"][0]["time"].is_string());
        assert!(json["total_query_time"].is_f64());
        assert_eq!(json["last_query"]["query"], "SELECT ?");
    }

    #[test]
    fn snapshot_display_lists_slow_queries() {
        let stats = QueryStats::new(Duration::from_millis(50), false);
        stats.record_query(QueryKind::Direct, "SELECT fast", None, Instant::now(), false);
        stats.record_query(
            QueryKind::Direct,
            "SELECT slow",
            None,
            started(Duration::from_millis(100)),
            false,
        );

        let report = stats.snapshot().to_string();
        let mut lines = report.lines();
        assert!(lines.next().unwrap().starts_with("2 queries (2 direct, 0 prepared, 0 failed)"));
        let slow_line = lines.next().unwrap();
        assert!(slow_line.ends_with("SELECT slow"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn stats_can_be_read_from_another_thread() {
        let stats = Arc::new(QueryStats::default());
        stats.record_query(QueryKind::Direct, "SELECT 1", None, Instant::now(), false);
        let reader = Arc::clone(&stats);
        let count = std::thread::spawn(move || reader.total_count()).join().unwrap();
        assert_eq!(count, 1);
    }
}
