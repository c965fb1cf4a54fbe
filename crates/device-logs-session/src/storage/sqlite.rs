//! SQLite log sink (feature-gated).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use device_logs_core::{FrameRef, LogLevel, LogRecord, LogSink, SinkError};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};

const SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS frames (
        frame_id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS logs (
        log_id INTEGER PRIMARY KEY AUTOINCREMENT,
        frame_id INTEGER REFERENCES frames(frame_id),
        timestamp TEXT NOT NULL,
        host_timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        component TEXT
    )",
];

fn backend(e: sqlx::Error) -> SinkError {
    SinkError::Backend(e.to_string())
}

/// SQLite sink.
///
/// Records land in a `logs` table keyed by insertion order; `frames` holds
/// the telemetry frames records are correlated with.
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Open (creating if missing) the database at `url` and apply the schema.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrated.
    pub async fn new(url: &str) -> Result<Self, SinkError> {
        let options = url
            .parse::<SqliteConnectOptions>()
            .map_err(backend)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(backend)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(backend)?;
        }
        tracing::debug!(url, "SQLite sink ready");

        Ok(Self { pool })
    }

    /// Record a new telemetry frame and return its id.
    ///
    /// # Errors
    /// Returns error if the insert fails.
    pub async fn insert_frame(&self, timestamp: DateTime<Utc>) -> Result<FrameRef, SinkError> {
        let result = sqlx::query("INSERT INTO frames (timestamp) VALUES (?)")
            .bind(timestamp)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.last_insert_rowid())
    }

    /// Number of persisted records.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub async fn count_logs(&self) -> Result<i64, SinkError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<LogRecord, sqlx::Error> {
    let level: String = row.try_get("level")?;
    Ok(LogRecord {
        device_timestamp: row.try_get("timestamp")?,
        host_timestamp: row.try_get("host_timestamp")?,
        level: LogLevel::from(level.as_str()),
        message: row.try_get("message")?,
        component: row.try_get("component")?,
    })
}

#[async_trait]
impl LogSink for SqliteSink {
    async fn insert_log(
        &self,
        frame: Option<FrameRef>,
        record: &LogRecord,
    ) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO logs (frame_id, timestamp, host_timestamp, level, message, component)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(frame)
        .bind(record.device_timestamp)
        .bind(record.host_timestamp)
        .bind(record.level.as_str())
        .bind(&record.message)
        .bind(record.component.as_deref())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_latest_log(&self) -> Result<Option<LogRecord>, SinkError> {
        let row = sqlx::query(
            "SELECT timestamp, host_timestamp, level, message, component
             FROM logs ORDER BY log_id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(backend)
    }

    async fn current_frame(&self) -> Result<Option<FrameRef>, SinkError> {
        sqlx::query_scalar("SELECT MAX(frame_id) FROM frames")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn record(second: u32, level: LogLevel, message: &str) -> LogRecord {
        LogRecord {
            device_timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, second).unwrap(),
            host_timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 1, 0).unwrap(),
            level,
            message: message.to_string(),
            component: Some("planner".to_string()),
        }
    }

    #[tokio::test]
    async fn test_latest_log_round_trip() {
        let sink = SqliteSink::new("sqlite::memory:").await.unwrap();
        assert!(sink.get_latest_log().await.unwrap().is_none());

        let first = record(1, LogLevel::Info, "first");
        let second = record(2, LogLevel::Other("NOTICE".into()), "second");
        sink.insert_log(None, &first).await.unwrap();
        sink.insert_log(None, &second).await.unwrap();

        assert_eq!(sink.get_latest_log().await.unwrap(), Some(second));
        assert_eq!(sink.count_logs().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_current_frame_tracks_latest() {
        let sink = SqliteSink::new("sqlite::memory:").await.unwrap();
        assert_eq!(sink.current_frame().await.unwrap(), None);

        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        sink.insert_frame(at).await.unwrap();
        let second = sink.insert_frame(at).await.unwrap();

        assert_eq!(sink.current_frame().await.unwrap(), Some(second));
        sink.insert_log(Some(second), &record(3, LogLevel::Warn, "tagged"))
            .await
            .unwrap();
    }
}
