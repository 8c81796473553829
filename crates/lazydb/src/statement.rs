//! Instrumented prepared statements.

use crate::stats::{QueryKind, QueryStats, QueryTimer};
use lazydb_core::{
    BoundVar, ErrorInfo, FetchMode, NativeStatement, ParamId, ParamType, Params, Result, Row, Value,
};
use std::fmt;
use std::sync::Arc;

/// A prepared statement that records each execution.
///
/// Created by [`LazyConnection::prepare`](crate::LazyConnection::prepare).
/// Executions are timed and recorded as [`QueryKind::Prepared`] into the
/// owning connection's [`QueryStats`]; every other operation goes straight to
/// the native statement.
pub struct Statement<S> {
    inner: S,
    query: String,
    stats: Arc<QueryStats>,
    last_params: Option<Params>,
}

impl<S: NativeStatement> Statement<S> {
    pub(crate) fn new(inner: S, query: impl Into<String>, stats: Arc<QueryStats>) -> Self {
        Self {
            inner,
            query: query.into(),
            stats,
            last_params: None,
        }
    }

    /// Execute with `params`, or with the bound parameters when `None`.
    ///
    /// Failures are recorded (with the attempted parameters) and returned
    /// unchanged.
    #[track_caller]
    pub fn execute(&mut self, params: Option<&Params>) -> Result<()> {
        self.last_params = params.cloned();
        let timer = QueryTimer::start(&self.stats, QueryKind::Prepared, &self.query, params);
        timer.observe(self.inner.execute(params))
    }

    /// Same as [`execute`](Self::execute).
    #[track_caller]
    pub fn exec(&mut self, params: Option<&Params>) -> Result<()> {
        self.execute(params)
    }

    pub fn bind_value(
        &mut self,
        param: impl Into<ParamId>,
        value: impl Into<Value>,
        param_type: ParamType,
    ) -> Result<()> {
        self.inner.bind_value(param.into(), value.into(), param_type)
    }

    /// Bind a shared variable; its value is read at each execution.
    pub fn bind_param(
        &mut self,
        param: impl Into<ParamId>,
        variable: BoundVar,
        param_type: ParamType,
    ) -> Result<()> {
        self.inner.bind_param(param.into(), variable, param_type)
    }

    pub fn fetch(&mut self, mode: Option<FetchMode>) -> Result<Option<Row>> {
        self.inner.fetch(mode)
    }

    pub fn fetch_all(&mut self, mode: Option<FetchMode>) -> Result<Vec<Row>> {
        self.inner.fetch_all(mode)
    }

    pub fn fetch_column(&mut self, column: usize) -> Result<Option<Value>> {
        self.inner.fetch_column(column)
    }

    pub fn row_count(&self) -> u64 {
        self.inner.row_count()
    }

    pub fn error_code(&self) -> Option<String> {
        self.inner.error_code()
    }

    pub fn error_info(&self) -> ErrorInfo {
        self.inner.error_info()
    }

    pub fn set_fetch_mode(&mut self, mode: FetchMode) -> Result<()> {
        self.inner.set_fetch_mode(mode)
    }

    pub fn close_cursor(&mut self) -> Result<()> {
        self.inner.close_cursor()
    }

    pub fn debug_dump_params(&self) -> String {
        self.inner.debug_dump_params()
    }

    /// The SQL this statement was prepared from.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Parameters passed to the most recent execution.
    pub fn last_params(&self) -> Option<&Params> {
        self.last_params.as_ref()
    }

    /// The recorder this statement reports to.
    pub fn stats(&self) -> Arc<QueryStats> {
        Arc::clone(&self.stats)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap the native statement. Later executions are not recorded.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> fmt::Debug for Statement<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("query", &self.query)
            .field("last_params", &self.last_params)
            .finish_non_exhaustive()
    }
}
