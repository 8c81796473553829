//! Scripted in-memory driver for unit tests.
//!
//! SQL containing `FAIL` errors on execution, SQL containing `INVALID` fails
//! to prepare, and `SLEEP <ms>` blocks for that many milliseconds.

use lazydb_core::error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind};
use lazydb_core::{
    Attribute, AttributeValue, BoundVar, Driver, Error, ErrorInfo, FetchMode, NativeConnection,
    NativeStatement, Options, ParamId, ParamType, Params, Result, Row, Value,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct MockLog {
    pub connects: usize,
    pub dsn: Option<String>,
    pub username: Option<String>,
    pub options: Options,
    /// Statements run directly or through a prepared statement
    pub executed: Vec<String>,
    pub attributes: Vec<(Attribute, AttributeValue)>,
}

impl MockLog {
    pub fn shared() -> Rc<RefCell<MockLog>> {
        Rc::new(RefCell::new(MockLog::default()))
    }
}

fn run_script(sql: &str) -> Result<()> {
    if let Some(ms) = sql.strip_prefix("SLEEP ").and_then(|ms| ms.trim().parse().ok()) {
        std::thread::sleep(Duration::from_millis(ms));
    }
    if sql.contains("FAIL") {
        return Err(Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            sqlstate: Some("42000".to_string()),
            driver_code: Some(1064),
            message: "scripted failure".to_string(),
            source: None,
        }));
    }
    Ok(())
}

pub(crate) struct MockDriver {
    pub log: Rc<RefCell<MockLog>>,
    pub fail_connect: bool,
    pub fail_attributes: bool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            log: MockLog::shared(),
            fail_connect: false,
            fail_attributes: false,
        }
    }
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    fn name(&self) -> &str {
        "mock"
    }

    fn connect(
        &self,
        dsn: &str,
        username: Option<&str>,
        _password: Option<&str>,
        options: &Options,
    ) -> Result<MockConnection> {
        let mut log = self.log.borrow_mut();
        log.connects += 1;
        if self.fail_connect {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Authentication,
                message: "access denied".to_string(),
                source: None,
            }));
        }
        log.dsn = Some(dsn.to_string());
        log.username = username.map(str::to_string);
        log.options = options.clone();
        Ok(MockConnection {
            log: Rc::clone(&self.log),
            fail_attributes: self.fail_attributes,
            in_transaction: false,
            attributes: BTreeMap::new(),
            last_error: None,
        })
    }
}

pub(crate) struct MockConnection {
    log: Rc<RefCell<MockLog>>,
    fail_attributes: bool,
    in_transaction: bool,
    attributes: BTreeMap<Attribute, AttributeValue>,
    last_error: Option<ErrorInfo>,
}

impl NativeConnection for MockConnection {
    type Statement = MockStatement;

    fn exec(&mut self, sql: &str) -> Result<u64> {
        self.log.borrow_mut().executed.push(sql.to_string());
        run_script(sql)?;
        Ok(1)
    }

    fn query(&mut self, sql: &str, _fetch_mode: Option<FetchMode>) -> Result<MockStatement> {
        self.log.borrow_mut().executed.push(sql.to_string());
        run_script(sql)?;
        Ok(MockStatement::new(sql, Rc::clone(&self.log)))
    }

    fn prepare(&mut self, sql: &str, _options: &Options) -> Option<MockStatement> {
        if sql.contains("INVALID") {
            self.last_error = Some(ErrorInfo {
                sqlstate: "42000".to_string(),
                driver_code: Some(1064),
                message: Some("scripted prepare failure".to_string()),
            });
            return None;
        }
        self.last_error = Some(ErrorInfo::ok());
        Some(MockStatement::new(sql, Rc::clone(&self.log)))
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::Query(QueryError::new(
                QueryErrorKind::Transaction,
                None,
                "There is already an active transaction",
            )));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::Query(QueryError::new(
                QueryErrorKind::Transaction,
                None,
                "There is no active transaction",
            )));
        }
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.commit()
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn get_attribute(&self, attribute: Attribute) -> Option<AttributeValue> {
        match attribute {
            Attribute::DriverName => Some(AttributeValue::Text("mock".to_string())),
            other => self.attributes.get(&other).cloned(),
        }
    }

    fn set_attribute(&mut self, attribute: Attribute, value: AttributeValue) -> Result<()> {
        if self.fail_attributes {
            return Err(Error::Custom("attribute rejected".to_string()));
        }
        self.log
            .borrow_mut()
            .attributes
            .push((attribute, value.clone()));
        self.attributes.insert(attribute, value);
        Ok(())
    }

    fn last_insert_id(&self, _name: Option<&str>) -> Result<String> {
        Ok("42".to_string())
    }

    fn quote(&self, text: &str, _param_type: ParamType) -> Option<String> {
        Some(format!("'{}'", text.replace('\'', "''")))
    }

    fn error_code(&self) -> Option<String> {
        self.last_error.as_ref().map(|e| e.sqlstate.clone())
    }

    fn error_info(&self) -> ErrorInfo {
        self.last_error.clone().unwrap_or_default()
    }
}

pub(crate) struct MockStatement {
    sql: String,
    log: Rc<RefCell<MockLog>>,
    bindings: BTreeMap<ParamId, Value>,
    executions: u64,
}

impl MockStatement {
    pub fn new(sql: &str, log: Rc<RefCell<MockLog>>) -> Self {
        Self {
            sql: sql.to_string(),
            log,
            bindings: BTreeMap::new(),
            executions: 0,
        }
    }

    pub fn bound(&self) -> usize {
        self.bindings.len()
    }
}

impl NativeStatement for MockStatement {
    fn execute(&mut self, _params: Option<&Params>) -> Result<()> {
        self.log.borrow_mut().executed.push(self.sql.clone());
        run_script(&self.sql)?;
        self.executions += 1;
        Ok(())
    }

    fn bind_value(&mut self, param: ParamId, value: Value, _param_type: ParamType) -> Result<()> {
        self.bindings.insert(param, value);
        Ok(())
    }

    fn bind_param(&mut self, param: ParamId, variable: BoundVar, _param_type: ParamType) -> Result<()> {
        let value = variable.borrow().clone();
        self.bindings.insert(param, value);
        Ok(())
    }

    fn fetch(&mut self, _mode: Option<FetchMode>) -> Result<Option<Row>> {
        Ok(None)
    }

    fn fetch_all(&mut self, _mode: Option<FetchMode>) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    fn fetch_column(&mut self, _column: usize) -> Result<Option<Value>> {
        Ok(None)
    }

    fn row_count(&self) -> u64 {
        self.executions
    }

    fn error_code(&self) -> Option<String> {
        None
    }

    fn error_info(&self) -> ErrorInfo {
        ErrorInfo::ok()
    }

    fn set_fetch_mode(&mut self, _mode: FetchMode) -> Result<()> {
        Ok(())
    }

    fn close_cursor(&mut self) -> Result<()> {
        Ok(())
    }

    fn debug_dump_params(&self) -> String {
        format!("SQL: {} ({} bound)", self.sql, self.bindings.len())
    }
}
