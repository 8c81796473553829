//! Lazily established, instrumented connection.
//!
//! A [`LazyConnection`] holds a [`ConnectionConfig`] and a driver, but does
//! not open a native connection until an operation needs one. Every public
//! operation goes through a single idempotent connect step, so the native
//! handle is either absent or fully set up (charset applied, strict error
//! mode and associative fetch mode configured), never in between.
//!
//! Direct queries (`exec`, `query`) are timed and recorded into the
//! connection's [`QueryStats`]. Prepared statements share the same recorder.

use crate::config::ConnectionConfig;
use crate::statement::Statement;
use crate::stats::{QueryKind, QueryStats, QueryTimer};
use lazydb_core::error::{ConnectionError, ConnectionErrorKind};
use lazydb_core::{
    Attribute, AttributeValue, Driver, Error, ErrorInfo, ErrorMode, FetchMode, NativeConnection,
    Options, ParamType, Result,
};
use std::fmt;
use std::sync::Arc;

/// Native statement type produced by a driver's connections.
pub type NativeStatementOf<D> = <<D as Driver>::Connection as NativeConnection>::Statement;

enum ConnectionState<C> {
    Unconnected,
    Connected(C),
}

/// A database connection that connects on first use and records queries.
pub struct LazyConnection<D: Driver> {
    config: ConnectionConfig,
    driver: D,
    state: ConnectionState<D::Connection>,
    stats: Arc<QueryStats>,
}

impl<D: Driver> LazyConnection<D> {
    /// Create an unconnected instance. The recorder starts now.
    pub fn new(config: ConnectionConfig, driver: D) -> Self {
        let stats = Arc::new(QueryStats::new(
            config.slow_query_threshold,
            config.capture_call_sites,
        ));
        Self {
            config,
            driver,
            state: ConnectionState::Unconnected,
            stats,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Has the native connection been opened?
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// Shared handle to this connection's recorder.
    pub fn stats(&self) -> Arc<QueryStats> {
        Arc::clone(&self.stats)
    }

    /// Open the native connection now instead of on first use.
    ///
    /// Does nothing when already connected.
    pub fn connect(&mut self) -> Result<()> {
        self.ensure_connected().map(|_| ())
    }

    fn ensure_connected(&mut self) -> Result<&mut D::Connection> {
        if let ConnectionState::Unconnected = self.state {
            let native = open(&self.driver, &self.config)?;
            self.state = ConnectionState::Connected(native);
        }
        match &mut self.state {
            ConnectionState::Connected(native) => Ok(native),
            ConnectionState::Unconnected => Err(Error::Custom(
                "connection state was not updated after connecting".to_string(),
            )),
        }
    }

    /// Execute a statement and return the number of affected rows.
    ///
    /// Recorded as a direct query; failures are recorded before being
    /// returned.
    #[track_caller]
    pub fn exec(&mut self, sql: &str) -> Result<u64> {
        let stats = Arc::clone(&self.stats);
        let native = self.ensure_connected()?;
        let timer = QueryTimer::start(&stats, QueryKind::Direct, sql, None);
        timer.observe(native.exec(sql))
    }

    /// Run a query and return the native statement holding its result.
    #[track_caller]
    pub fn query(
        &mut self,
        sql: &str,
        fetch_mode: Option<FetchMode>,
    ) -> Result<NativeStatementOf<D>> {
        let stats = Arc::clone(&self.stats);
        let native = self.ensure_connected()?;
        let timer = QueryTimer::start(&stats, QueryKind::Direct, sql, None);
        timer.observe(native.query(sql, fetch_mode))
    }

    /// Prepare a statement.
    ///
    /// `Ok(None)` means the driver refused the statement; the details are
    /// available from [`error_info`](Self::error_info). Nothing is recorded.
    pub fn prepare(&mut self, sql: &str) -> Result<Option<Statement<NativeStatementOf<D>>>> {
        self.prepare_with_options(sql, &Options::new())
    }

    /// Prepare a statement with driver options.
    pub fn prepare_with_options(
        &mut self,
        sql: &str,
        options: &Options,
    ) -> Result<Option<Statement<NativeStatementOf<D>>>> {
        let stats = Arc::clone(&self.stats);
        let native = self.ensure_connected()?;
        Ok(native
            .prepare(sql, options)
            .map(|statement| Statement::new(statement, sql, stats)))
    }

    pub fn begin_transaction(&mut self) -> Result<()> {
        self.ensure_connected()?.begin_transaction()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.ensure_connected()?.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_connected()?.rollback()
    }

    pub fn in_transaction(&mut self) -> Result<bool> {
        Ok(self.ensure_connected()?.in_transaction())
    }

    pub fn get_attribute(&mut self, attribute: Attribute) -> Result<Option<AttributeValue>> {
        Ok(self.ensure_connected()?.get_attribute(attribute))
    }

    pub fn set_attribute(
        &mut self,
        attribute: Attribute,
        value: impl Into<AttributeValue>,
    ) -> Result<()> {
        self.ensure_connected()?
            .set_attribute(attribute, value.into())
    }

    pub fn last_insert_id(&mut self, name: Option<&str>) -> Result<String> {
        self.ensure_connected()?.last_insert_id(name)
    }

    pub fn quote(&mut self, text: &str, param_type: ParamType) -> Result<Option<String>> {
        Ok(self.ensure_connected()?.quote(text, param_type))
    }

    pub fn error_code(&mut self) -> Result<Option<String>> {
        Ok(self.ensure_connected()?.error_code())
    }

    pub fn error_info(&mut self) -> Result<ErrorInfo> {
        Ok(self.ensure_connected()?.error_info())
    }
}

/// Open and set up a native connection.
///
/// Connect errors are returned as the driver reported them. Failures in the
/// setup that follows are wrapped as [`ConnectionErrorKind::Setup`] and the
/// half-configured handle is dropped.
fn open<D: Driver>(driver: &D, config: &ConnectionConfig) -> Result<D::Connection> {
    let dsn = config.dsn();
    tracing::debug!(
        target: "lazydb::connection",
        driver = driver.name(),
        dsn = %dsn,
        charset = ?config.charset,
        "connecting"
    );

    let mut native = driver.connect(
        &dsn,
        config.username.as_deref(),
        config.password.as_deref(),
        &config.merged_options(),
    )?;

    if let Some(charset) = &config.charset {
        let sql = driver.charset_statement(charset, config.charset_collation.as_deref());
        tracing::debug!(target: "lazydb::connection", sql = %sql, "setting session charset");
        native
            .exec(&sql)
            .map_err(|e| setup_error("failed to set session charset", e))?;
    }

    native
        .set_attribute(Attribute::ErrorMode, ErrorMode::Exception.into())
        .map_err(|e| setup_error("failed to set error mode", e))?;
    native
        .set_attribute(Attribute::DefaultFetchMode, FetchMode::Assoc.into())
        .map_err(|e| setup_error("failed to set default fetch mode", e))?;

    Ok(native)
}

fn setup_error(message: &str, source: Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Setup,
        message: format!("{}: {}", message, source),
        source: Some(Box::new(source)),
    })
}

impl<D: Driver> fmt::Debug for LazyConnection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyConnection")
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
