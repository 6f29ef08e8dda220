use crate::error::SinkError;
use crate::snapshot::{SnapshotView, SOURCE_COUNT};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::time::Duration;

pub const ROW_WIDTH: usize = SOURCE_COUNT * 3;

/// One persisted sample: amps, volts and watts for every string in source
/// order. The total is derived and never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub values: [f64; ROW_WIDTH],
}

impl From<&SnapshotView> for SnapshotRow {
    fn from(view: &SnapshotView) -> Self {
        let mut values = [0.0; ROW_WIDTH];
        for (chunk, string) in values.chunks_exact_mut(3).zip(&view.strings) {
            chunk[0] = string.current;
            chunk[1] = string.voltage;
            chunk[2] = string.power;
        }
        Self { values }
    }
}

/// Column names `amps_a, volts_a, watts_a, ... watts_k`.
pub fn column_names() -> Vec<String> {
    (b'a'..)
        .take(SOURCE_COUNT)
        .flat_map(|letter| {
            let letter = letter as char;
            [
                format!("amps_{letter}"),
                format!("volts_{letter}"),
                format!("watts_{letter}"),
            ]
        })
        .collect()
}

pub fn insert_statement(table: &str) -> String {
    let columns = column_names();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    )
}

/// Durable destination for flushed snapshots.
#[async_trait]
pub trait Sink: Send {
    /// Returns the number of rows written.
    async fn write(&mut self, row: &SnapshotRow) -> Result<u64, SinkError>;
}

#[derive(Debug, Clone)]
pub struct DbSettings {
    pub login: String,
    pub password: String,
    pub database: String,
    pub server: String,
    pub table: String,
}

impl DbSettings {
    fn connect_options(&self) -> MySqlConnectOptions {
        let (host, port) = match self.server.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().unwrap_or(3306)),
            None => (self.server.as_str(), 3306),
        };
        MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(&self.login)
            .password(&self.password)
            .database(&self.database)
    }
}

/// MySQL table sink. The pool connects lazily, so a database that is down at
/// start-up only costs the rows written while it is unreachable.
#[derive(Clone)]
pub struct MySqlSink {
    pool: MySqlPool,
    statement: String,
}

impl MySqlSink {
    pub fn new(settings: &DbSettings, acquire_timeout: Duration) -> Self {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(settings.connect_options());
        Self {
            pool,
            statement: insert_statement(&format!("{}.{}", settings.database, settings.table)),
        }
    }

    pub async fn ping(&self) -> Result<(), SinkError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Sink for MySqlSink {
    async fn write(&mut self, row: &SnapshotRow) -> Result<u64, SinkError> {
        let mut query = sqlx::query(&self.statement);
        for value in row.values {
            query = query.bind(value);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
