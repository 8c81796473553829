//! Connection configuration.
//!
//! Holds everything needed to build a connection string, the credentials and
//! options handed to the driver, and the instrumentation settings used by the
//! query recorder. Building a config never touches the network.

use crate::connection::LazyConnection;
use lazydb_core::error::ConfigError;
use lazydb_core::{Attribute, AttributeValue, Driver, Error, Options, Result};
use std::fmt;
use std::time::Duration;

/// Default slow-query threshold.
pub const DEFAULT_SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(1);

/// Connection configuration.
///
/// Built with chained setters and consumed by [`ConnectionConfig::connect`].
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Driver name used as the DSN prefix (default: mysql)
    pub driver: String,
    /// Hostname (default: localhost)
    pub host: String,
    /// Port number (default: 3306, `None` omits it from the DSN)
    pub port: Option<u16>,
    /// Database name
    pub database: Option<String>,
    /// Session character set
    pub charset: Option<String>,
    /// Collation applied together with the character set
    pub charset_collation: Option<String>,
    /// Username for authentication
    pub username: Option<String>,
    /// Password for authentication
    pub password: Option<String>,
    /// Generic connection options
    pub options: Options,
    /// Driver-specific options, applied over the generic ones
    pub driver_options: Options,
    /// Queries at least this long are logged as slow
    pub slow_query_threshold: Duration,
    /// Record the caller's file and line with each query
    pub capture_call_sites: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: "mysql".to_string(),
            host: "localhost".to_string(),
            port: Some(3306),
            database: None,
            charset: None,
            charset_collation: None,
            username: None,
            password: None,
            options: Options::new(),
            driver_options: Options::new(),
            slow_query_threshold: DEFAULT_SLOW_QUERY_THRESHOLD,
            capture_call_sites: false,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("charset_collation", &self.charset_collation)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("options", &self.options)
            .field("driver_options", &self.driver_options)
            .field("slow_query_threshold", &self.slow_query_threshold)
            .field("capture_call_sites", &self.capture_call_sites)
            .finish()
    }
}

impl ConnectionConfig {
    /// Create a configuration for `driver` on `host` using `database`.
    pub fn new(
        driver: impl Into<String>,
        host: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            host: host.into(),
            database: Some(database.into()),
            ..Self::default()
        }
    }

    /// Build a configuration from `LAZYDB_*` environment variables.
    ///
    /// Unset variables keep their defaults. See [`from_lookup`](Self::from_lookup)
    /// for the variable list.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Recognised keys: `LAZYDB_DRIVER`, `LAZYDB_HOST`, `LAZYDB_PORT`,
    /// `LAZYDB_DATABASE`, `LAZYDB_CHARSET`, `LAZYDB_COLLATION`,
    /// `LAZYDB_USERNAME`, `LAZYDB_PASSWORD`, `LAZYDB_SLOW_QUERY_MS` and
    /// `LAZYDB_CAPTURE_CALL_SITES`. An empty `LAZYDB_PORT` omits the port.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(driver) = lookup("LAZYDB_DRIVER") {
            config.driver = driver;
        }
        if let Some(host) = lookup("LAZYDB_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("LAZYDB_PORT") {
            config.port = if port.trim().is_empty() {
                None
            } else {
                Some(parse_key("LAZYDB_PORT", &port)?)
            };
        }
        config.database = lookup("LAZYDB_DATABASE").or(config.database);
        config.charset = lookup("LAZYDB_CHARSET").or(config.charset);
        config.charset_collation = lookup("LAZYDB_COLLATION").or(config.charset_collation);
        config.username = lookup("LAZYDB_USERNAME").or(config.username);
        config.password = lookup("LAZYDB_PASSWORD").or(config.password);

        if let Some(ms) = lookup("LAZYDB_SLOW_QUERY_MS") {
            config.slow_query_threshold = Duration::from_millis(parse_key("LAZYDB_SLOW_QUERY_MS", &ms)?);
        }
        if let Some(flag) = lookup("LAZYDB_CAPTURE_CALL_SITES") {
            config.capture_call_sites = parse_flag("LAZYDB_CAPTURE_CALL_SITES", &flag)?;
        }

        Ok(config)
    }

    /// Set the driver name.
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port; `None` leaves it out of the DSN.
    pub fn port(mut self, port: impl Into<Option<u16>>) -> Self {
        self.port = port.into();
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the session character set.
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Set the collation used with the character set.
    pub fn charset_collation(mut self, collation: impl Into<String>) -> Self {
        self.charset_collation = Some(collation.into());
        self
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set username and password together.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set a generic connection option.
    pub fn option(mut self, attribute: Attribute, value: impl Into<AttributeValue>) -> Self {
        self.options.insert(attribute, value.into());
        self
    }

    /// Set a driver-specific option. Wins over a generic option with the same key.
    pub fn driver_option(mut self, attribute: Attribute, value: impl Into<AttributeValue>) -> Self {
        self.driver_options.insert(attribute, value.into());
        self
    }

    /// Set the slow-query threshold.
    pub fn slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Set the slow-query threshold in milliseconds.
    pub fn slow_query_threshold_ms(self, ms: u64) -> Self {
        self.slow_query_threshold(Duration::from_millis(ms))
    }

    /// Set the slow-query threshold in (fractional) seconds.
    ///
    /// Negative and NaN values clamp to zero.
    pub fn slow_query_threshold_secs(self, secs: f64) -> Self {
        let threshold = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
        self.slow_query_threshold(threshold)
    }

    /// Enable or disable call-site capture for recorded queries.
    pub fn capture_call_sites(mut self, enabled: bool) -> Self {
        self.capture_call_sites = enabled;
        self
    }

    /// Build the connection string.
    ///
    /// Format: `driver:host=H;dbname=D[;port=P][;charset=C]`.
    pub fn dsn(&self) -> String {
        let mut dsn = format!(
            "{}:host={};dbname={}",
            self.driver,
            self.host,
            self.database.as_deref().unwrap_or_default()
        );
        if let Some(port) = self.port {
            dsn.push_str(&format!(";port={}", port));
        }
        if let Some(charset) = &self.charset {
            dsn.push_str(&format!(";charset={}", charset));
        }
        dsn
    }

    /// Generic options merged with driver-specific ones.
    pub fn merged_options(&self) -> Options {
        let mut merged = self.options.clone();
        merged.extend(
            self.driver_options
                .iter()
                .map(|(attribute, value)| (*attribute, value.clone())),
        );
        merged
    }

    /// Create a lazy connection. Nothing is opened until the first query.
    pub fn connect<D: Driver>(self, driver: D) -> LazyConnection<D> {
        LazyConnection::new(self, driver)
    }
}

fn config_error(key: &str, message: String) -> Error {
    Error::Config(ConfigError {
        key: Some(key.to_string()),
        message,
        source: None,
    })
}

fn parse_key<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim().parse().map_err(|e: T::Err| {
        Error::Config(ConfigError {
            key: Some(key.to_string()),
            message: format!("invalid value {:?}", raw),
            source: Some(Box::new(e)),
        })
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(config_error(key, format!("expected a boolean, got {:?}", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazydb_core::{ErrorMode, FetchMode};
    use std::collections::HashMap;

    #[test]
    fn dsn_omits_unset_port_and_charset() {
        let config = ConnectionConfig::new("mysql", "db1", "app")
            .port(None)
            .charset("utf8mb4");
        assert_eq!(config.dsn(), "mysql:host=db1;dbname=app;charset=utf8mb4");

        let config = ConnectionConfig::new("pgsql", "db2", "app").port(5432);
        assert_eq!(config.dsn(), "pgsql:host=db2;dbname=app;port=5432");
    }

    #[test]
    fn defaults_match_a_local_mysql_server() {
        let config = ConnectionConfig::default();
        assert_eq!(config.dsn(), "mysql:host=localhost;dbname=;port=3306");
        assert_eq!(config.slow_query_threshold, Duration::from_secs(1));
        assert!(!config.capture_call_sites);
    }

    #[test]
    fn driver_options_win_on_collision() {
        let config = ConnectionConfig::default()
            .option(Attribute::Timeout, 5_i64)
            .option(Attribute::ErrorMode, ErrorMode::Silent)
            .driver_option(Attribute::Timeout, 30_i64)
            .driver_option(Attribute::DefaultFetchMode, FetchMode::Num);

        let merged = config.merged_options();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get(&Attribute::Timeout), Some(&AttributeValue::Int(30)));
        assert_eq!(
            merged.get(&Attribute::ErrorMode),
            Some(&AttributeValue::ErrorMode(ErrorMode::Silent))
        );
    }

    #[test]
    fn thresholds_normalise_to_one_duration() {
        let ms = ConnectionConfig::default().slow_query_threshold_ms(50);
        let secs = ConnectionConfig::default().slow_query_threshold_secs(0.05);
        assert_eq!(ms.slow_query_threshold, Duration::from_millis(50));
        assert_eq!(secs.slow_query_threshold, Duration::from_millis(50));

        let negative = ConnectionConfig::default().slow_query_threshold_secs(-1.0);
        assert_eq!(negative.slow_query_threshold, Duration::ZERO);
    }

    #[test]
    fn from_lookup_reads_known_keys() {
        let vars: HashMap<&str, &str> = [
            ("LAZYDB_DRIVER", "pgsql"),
            ("LAZYDB_HOST", "db.internal"),
            ("LAZYDB_PORT", ""),
            ("LAZYDB_DATABASE", "app"),
            ("LAZYDB_USERNAME", "svc"),
            ("LAZYDB_PASSWORD", "hunter2"),
            ("LAZYDB_SLOW_QUERY_MS", "250"),
            ("LAZYDB_CAPTURE_CALL_SITES", "yes"),
        ]
        .into_iter()
        .collect();

        let config =
            ConnectionConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.dsn(), "pgsql:host=db.internal;dbname=app");
        assert_eq!(config.username.as_deref(), Some("svc"));
        assert_eq!(config.slow_query_threshold, Duration::from_millis(250));
        assert!(config.capture_call_sites);
    }

    #[test]
    fn from_lookup_rejects_malformed_numbers() {
        let err = ConnectionConfig::from_lookup(|key| {
            (key == "LAZYDB_PORT").then(|| "not-a-port".to_string())
        })
        .unwrap_err();
        assert!(matches!(&err, Error::Config(e) if e.key.as_deref() == Some("LAZYDB_PORT")));

        let err = ConnectionConfig::from_lookup(|key| {
            (key == "LAZYDB_CAPTURE_CALL_SITES").then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("LAZYDB_CAPTURE_CALL_SITES"));
    }

    #[test]
    fn debug_output_redacts_the_password() {
        let config = ConnectionConfig::default().credentials("root", "s3cret");
        let debug = format!("{:?}", config);
        assert!(debug.contains("root"));
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }
}
