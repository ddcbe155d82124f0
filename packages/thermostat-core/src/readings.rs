//! Local history of thermostat readings.
//!
//! Stored in SQLite by default, or in PostgreSQL (and wire-compatible servers
//! such as CockroachDB) when the database URL says so.

use crate::nest::ThermostatStats;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::time::Duration;
use tracing::instrument;

const SQLITE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS device_stats (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    name               TEXT NOT NULL,
    display_name       TEXT,
    recorded_at        TEXT NOT NULL,
    humidity           REAL,
    temperature        REAL,
    mode               TEXT,
    eco_mode           TEXT,
    hvac_status        TEXT,
    target_temperature REAL
);
CREATE INDEX IF NOT EXISTS device_stats_name_recorded_at
    ON device_stats (name, recorded_at);
";

const POSTGRES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS device_stats (
    id                 BIGSERIAL PRIMARY KEY,
    name               TEXT NOT NULL,
    display_name       TEXT,
    recorded_at        TEXT NOT NULL,
    humidity           DOUBLE PRECISION,
    temperature        DOUBLE PRECISION,
    mode               TEXT,
    eco_mode           TEXT,
    hvac_status        TEXT,
    target_temperature DOUBLE PRECISION
);
CREATE INDEX IF NOT EXISTS device_stats_name_recorded_at
    ON device_stats (name, recorded_at);
";

const COLUMNS: &str = "id, name, display_name, recorded_at, humidity, temperature, \
                       mode, eco_mode, hvac_status, target_temperature";

/// Matches a reading by full name, trailing device id or display name.
const DEVICE_FILTER: &str = "(name = $1 OR display_name = $1 OR name LIKE '%/' || $1)";

/// Errors raised by the readings database.
#[derive(Debug, thiserror::Error)]
pub enum ReadingsError {
    #[error("unsupported database URL '{0}' (expected sqlite:, postgres: or postgresql:)")]
    UnsupportedUrl(String),

    #[error("error connecting to readings db {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("readings db query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("reading {id} has an invalid timestamp '{value}'")]
    InvalidTimestamp { id: i64, value: String },
}

/// Database engine behind a readings URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    /// PostgreSQL or anything speaking its wire protocol (CockroachDB)
    Postgres,
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self, ReadingsError> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            _ => Err(ReadingsError::UnsupportedUrl(url.to_string())),
        }
    }

    fn schema(self) -> &'static str {
        match self {
            Backend::Sqlite => SQLITE_SCHEMA,
            Backend::Postgres => POSTGRES_SCHEMA,
        }
    }

    /// SQLite gets a single connection so `sqlite::memory:` keeps one
    /// database for the pool's whole lifetime.
    fn max_connections(self) -> u32 {
        match self {
            Backend::Sqlite => 1,
            Backend::Postgres => 4,
        }
    }

    /// The URL to hand to the driver; SQLite files are created if missing.
    fn connect_url(self, url: &str) -> String {
        match self {
            Backend::Sqlite if !url.contains(":memory:") && !url.contains("mode=") => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{url}{sep}mode=rwc")
            }
            _ => url.to_string(),
        }
    }
}

/// One row of `device_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub id: i64,
    /// Full SDM device name
    pub name: String,
    pub display_name: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub humidity: Option<f64>,
    pub temperature: Option<f64>,
    pub mode: Option<String>,
    pub eco_mode: Option<String>,
    pub hvac_status: Option<String>,
    pub target_temperature: Option<f64>,
}

/// Row as stored; timestamps are fixed-width RFC 3339 text so they sort.
#[derive(sqlx::FromRow)]
struct ReadingRow {
    id: i64,
    name: String,
    display_name: Option<String>,
    recorded_at: String,
    humidity: Option<f64>,
    temperature: Option<f64>,
    mode: Option<String>,
    eco_mode: Option<String>,
    hvac_status: Option<String>,
    target_temperature: Option<f64>,
}

impl TryFrom<ReadingRow> for StoredReading {
    type Error = ReadingsError;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        let recorded_at = DateTime::parse_from_rfc3339(&row.recorded_at)
            .map_err(|_| ReadingsError::InvalidTimestamp {
                id: row.id,
                value: row.recorded_at.clone(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            id: row.id,
            name: row.name,
            display_name: row.display_name,
            recorded_at,
            humidity: row.humidity,
            temperature: row.temperature,
            mode: row.mode,
            eco_mode: row.eco_mode,
            hvac_status: row.hvac_status,
            target_temperature: row.target_temperature,
        })
    }
}

fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn into_readings(rows: Vec<ReadingRow>) -> Result<Vec<StoredReading>, ReadingsError> {
    rows.into_iter().map(StoredReading::try_from).collect()
}

/// Handle on the readings database.
#[derive(Debug, Clone)]
pub struct ReadingsDb {
    pool: AnyPool,
    backend: Backend,
}

impl ReadingsDb {
    /// Open the database at `url` and make sure the schema exists.
    ///
    /// A SQLite database file is created if missing.
    #[instrument(skip_all, err)]
    pub async fn connect(url: &str) -> Result<Self, ReadingsError> {
        let backend = Backend::from_url(url)?;
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(backend.max_connections())
            .acquire_timeout(Duration::from_secs(5))
            .connect(&backend.connect_url(url))
            .await
            .map_err(|source| ReadingsError::Connect {
                url: url.to_string(),
                source,
            })?;

        sqlx::raw_sql(backend.schema()).execute(&pool).await?;
        tracing::debug!("Readings database ready ({:?})", backend);

        Ok(Self { pool, backend })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Record a reading and return its row id.
    #[instrument(skip(self, stats), fields(device = %stats.device_name), err)]
    pub async fn save(
        &self,
        stats: &ThermostatStats,
        recorded_at: DateTime<Utc>,
    ) -> Result<i64, ReadingsError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO device_stats
                (name, display_name, recorded_at, humidity, temperature,
                 mode, eco_mode, hvac_status, target_temperature)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(stats.device_name.as_str())
        .bind(stats.display_name.as_str())
        .bind(encode_time(recorded_at))
        .bind(stats.humidity_percent)
        .bind(stats.ambient_temperature_celsius)
        .bind(stats.mode.as_deref())
        .bind(stats.eco_mode.as_deref())
        .bind(stats.hvac_status.as_deref())
        .bind(stats.target_temperature_celsius)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Latest `limit` readings, newest first. `None` covers every device.
    pub async fn recent(
        &self,
        device: Option<&str>,
        limit: u32,
    ) -> Result<Vec<StoredReading>, ReadingsError> {
        let rows = match device {
            Some(device) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM device_stats WHERE {DEVICE_FILTER}
                     ORDER BY recorded_at DESC, id DESC LIMIT $2"
                );
                sqlx::query_as::<_, ReadingRow>(&sql)
                    .bind(device)
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM device_stats
                     ORDER BY recorded_at DESC, id DESC LIMIT $1"
                );
                sqlx::query_as::<_, ReadingRow>(&sql)
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        into_readings(rows)
    }

    /// Readings of one device recorded in `[from, to)`, oldest first.
    pub async fn between(
        &self,
        device: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredReading>, ReadingsError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM device_stats
             WHERE {DEVICE_FILTER} AND recorded_at >= $2 AND recorded_at < $3
             ORDER BY recorded_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, ReadingRow>(&sql)
            .bind(device)
            .bind(encode_time(from))
            .bind(encode_time(to))
            .fetch_all(&self.pool)
            .await?;

        into_readings(rows)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn stats(device: &str, temperature: f64) -> ThermostatStats {
        ThermostatStats {
            device_name: device.to_string(),
            display_name: "Hallway".to_string(),
            connectivity: Some("ONLINE".to_string()),
            ambient_temperature_celsius: Some(temperature),
            humidity_percent: Some(41.0),
            mode: Some("HEAT".to_string()),
            eco_mode: Some("OFF".to_string()),
            hvac_status: Some("HEATING".to_string()),
            heat_celsius: Some(21.0),
            cool_celsius: None,
            target_temperature_celsius: Some(21.0),
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    async fn memory_db() -> ReadingsDb {
        ReadingsDb::connect("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn test_backend_from_url_scheme() {
        assert_eq!(Backend::from_url("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(
            Backend::from_url("sqlite:///var/lib/nest/readings.db").unwrap(),
            Backend::Sqlite
        );
        assert_eq!(
            Backend::from_url("postgres://nest:pw@localhost/nest").unwrap(),
            Backend::Postgres
        );
        assert_eq!(
            Backend::from_url("postgresql://root@cockroach:26257/defaultdb?sslmode=disable")
                .unwrap(),
            Backend::Postgres
        );
        assert!(matches!(
            Backend::from_url("mysql://localhost/nest"),
            Err(ReadingsError::UnsupportedUrl(_))
        ));
        assert!(matches!(
            Backend::from_url("readings.db"),
            Err(ReadingsError::UnsupportedUrl(_))
        ));
    }

    #[test]
    fn test_connect_url_creates_sqlite_files_only() {
        assert_eq!(
            Backend::Sqlite.connect_url("sqlite:///tmp/r.db"),
            "sqlite:///tmp/r.db?mode=rwc"
        );
        assert_eq!(
            Backend::Sqlite.connect_url("sqlite:///tmp/r.db?cache=shared"),
            "sqlite:///tmp/r.db?cache=shared&mode=rwc"
        );
        assert_eq!(Backend::Sqlite.connect_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            Backend::Sqlite.connect_url("sqlite:///tmp/r.db?mode=ro"),
            "sqlite:///tmp/r.db?mode=ro"
        );
        assert_eq!(
            Backend::Postgres.connect_url("postgres://localhost/nest"),
            "postgres://localhost/nest"
        );
    }

    #[tokio::test]
    async fn test_unsupported_url_fails_before_connecting() {
        assert!(matches!(
            ReadingsDb::connect("mysql://localhost/nest").await,
            Err(ReadingsError::UnsupportedUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let db = memory_db().await;
        assert_eq!(db.backend(), Backend::Sqlite);

        let id = db.save(&stats("enterprises/p/devices/a", 19.5), at(8)).await.unwrap();
        let rows = db.recent(Some("enterprises/p/devices/a"), 10).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].name, "enterprises/p/devices/a");
        assert_eq!(rows[0].display_name.as_deref(), Some("Hallway"));
        assert_eq!(rows[0].recorded_at, at(8));
        assert_eq!(rows[0].temperature, Some(19.5));
        assert_eq!(rows[0].humidity, Some(41.0));
        assert_eq!(rows[0].mode.as_deref(), Some("HEAT"));
        assert_eq!(rows[0].target_temperature, Some(21.0));
    }

    #[tokio::test]
    async fn test_device_filter_accepts_id_and_display_name() {
        let db = memory_db().await;
        db.save(&stats("enterprises/p/devices/a", 19.5), at(8)).await.unwrap();
        let mut other = stats("enterprises/p/devices/b", 22.0);
        other.display_name = "Attic".to_string();
        db.save(&other, at(9)).await.unwrap();

        assert_eq!(db.recent(Some("a"), 10).await.unwrap().len(), 1);
        assert_eq!(db.recent(Some("Hallway"), 10).await.unwrap()[0].temperature, Some(19.5));
        assert_eq!(db.recent(Some("Attic"), 10).await.unwrap()[0].temperature, Some(22.0));
        assert!(db.recent(Some("c"), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_limited() {
        let db = memory_db().await;
        for hour in [9, 7, 11, 10] {
            db.save(&stats("dev/a", f64::from(hour)), at(hour))
                .await
                .unwrap();
        }
        db.save(&stats("dev/b", 30.0), at(12)).await.unwrap();

        let rows = db.recent(Some("dev/a"), 2).await.unwrap();
        let hours: Vec<_> = rows.iter().map(|r| r.recorded_at).collect();
        assert_eq!(hours, vec![at(11), at(10)]);

        let all = db.recent(None, 10).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].name, "dev/b");
    }

    #[tokio::test]
    async fn test_between_is_half_open_and_oldest_first() {
        let db = memory_db().await;
        for hour in 6..12 {
            db.save(&stats("dev/a", 20.0), at(hour)).await.unwrap();
        }

        let rows = db.between("dev/a", at(8), at(10)).await.unwrap();
        let hours: Vec<_> = rows.iter().map(|r| r.recorded_at).collect();
        assert_eq!(hours, vec![at(8), at(9)]);

        let none = db
            .between("dev/a", at(11) + ChronoDuration::minutes(1), at(12))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_sub_second_timestamps_keep_order() {
        let db = memory_db().await;
        let base = at(8);
        db.save(&stats("dev/a", 1.0), base + ChronoDuration::milliseconds(500))
            .await
            .unwrap();
        db.save(&stats("dev/a", 2.0), base).await.unwrap();

        let rows = db.between("dev/a", base, at(9)).await.unwrap();
        let temps: Vec<_> = rows.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![Some(2.0), Some(1.0)]);
    }

    #[tokio::test]
    async fn test_missing_values_are_null() {
        let db = memory_db().await;
        let mut offline = stats("dev/a", 0.0);
        offline.ambient_temperature_celsius = None;
        offline.target_temperature_celsius = None;
        offline.mode = None;

        db.save(&offline, at(1)).await.unwrap();

        let row = &db.recent(None, 1).await.unwrap()[0];
        assert_eq!(row.temperature, None);
        assert_eq!(row.target_temperature, None);
        assert_eq!(row.mode, None);
    }

    #[tokio::test]
    async fn test_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        let url = format!("sqlite://{}", path.display());

        let db = ReadingsDb::connect(&url).await.unwrap();
        db.save(&stats("dev/a", 20.0), at(1)).await.unwrap();
        db.close().await;

        assert!(path.exists());
        let reopened = ReadingsDb::connect(&url).await.unwrap();
        assert_eq!(reopened.recent(None, 10).await.unwrap().len(), 1);
    }
}
