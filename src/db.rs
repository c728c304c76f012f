//! SQLite-backed storage for collected flight history.
//!
//! [`RecordStore`] owns a single connection behind a mutex and is cheap to
//! clone. Every call blocks on SQLite, so async callers go through
//! [`RecordStore::run_blocking`]. Bulk inserts run in one transaction, so a
//! batch is either fully visible to readers or not at all.

use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{FlightRecord, NewFlightRecord, RouteQuery};

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS flight_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    flight_iata TEXT NOT NULL,
    origin_iata TEXT NOT NULL,
    destination_iata TEXT NOT NULL,
    flight_date TEXT NOT NULL,
    scheduled_departure_utc_millis INTEGER NOT NULL,
    actual_departure_utc_millis INTEGER,
    scheduled_arrival_utc_millis INTEGER NOT NULL,
    actual_arrival_utc_millis INTEGER,
    recorded_at_millis INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flight_history_route
    ON flight_history (origin_iata, destination_iata);
CREATE INDEX IF NOT EXISTS idx_flight_history_date
    ON flight_history (flight_date);
";

const COLUMNS: &str = "id, flight_iata, origin_iata, destination_iata, flight_date, \
    scheduled_departure_utc_millis, actual_departure_utc_millis, \
    scheduled_arrival_utc_millis, actual_arrival_utc_millis, recorded_at_millis";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("storage connection poisoned")]
    Poisoned,
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        // WAL keeps the file readable by other processes during a batch.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("journal_mode={mode}");
        let store = Self::from_connection(conn)?;
        info!("Opened flight history at {}", path.as_ref().display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Runs `f` on tokio's blocking pool against a clone of this store.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&RecordStore) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }
        if current < 1 {
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    pub fn insert(&self, record: &NewFlightRecord) -> Result<i64, StorageError> {
        let conn = self.lock()?;
        insert_row(&conn, record)?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts the whole batch in a single transaction. Returns how many rows
    /// were written; on error nothing from the batch is kept.
    pub fn insert_many(&self, records: &[NewFlightRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for record in records {
            insert_row(&tx, record)?;
        }
        tx.commit()?;
        debug!("Committed batch of {} records", records.len());
        Ok(records.len())
    }

    pub fn count_for_route_on_date(
        &self,
        route: &RouteQuery,
        date: &str,
    ) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM flight_history
             WHERE origin_iata = ?1 AND destination_iata = ?2 AND flight_date = ?3",
            params![route.origin, route.destination, date],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// All records for a route, most recent flight date first.
    pub fn records_for_route(&self, route: &RouteQuery) -> Result<Vec<FlightRecord>, StorageError> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM flight_history
                 WHERE origin_iata = ?1 AND destination_iata = ?2
                 ORDER BY flight_date DESC, id DESC"
            ),
            params![route.origin, route.destination],
        )
    }

    /// Records for a route with both actual times present.
    pub fn valid_records_for_aggregation(
        &self,
        route: &RouteQuery,
    ) -> Result<Vec<FlightRecord>, StorageError> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM flight_history
                 WHERE origin_iata = ?1 AND destination_iata = ?2
                   AND actual_departure_utc_millis IS NOT NULL
                   AND actual_arrival_utc_millis IS NOT NULL"
            ),
            params![route.origin, route.destination],
        )
    }

    /// Every stored record, newest capture first.
    pub fn all_records(&self) -> Result<Vec<FlightRecord>, StorageError> {
        self.query(
            &format!("SELECT {COLUMNS} FROM flight_history ORDER BY recorded_at_millis DESC, id DESC"),
            [],
        )
    }

    /// Deletes records captured strictly before `threshold_millis`.
    pub fn purge_older_than(&self, threshold_millis: i64) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM flight_history WHERE recorded_at_millis < ?1",
            params![threshold_millis],
        )?;
        Ok(deleted)
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM flight_history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn query(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<FlightRecord>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn insert_row(conn: &Connection, record: &NewFlightRecord) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR REPLACE INTO flight_history (
            flight_iata,
            origin_iata,
            destination_iata,
            flight_date,
            scheduled_departure_utc_millis,
            actual_departure_utc_millis,
            scheduled_arrival_utc_millis,
            actual_arrival_utc_millis,
            recorded_at_millis
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.flight_iata,
            record.origin_iata,
            record.destination_iata,
            record.flight_date,
            record.scheduled_departure_utc_millis,
            record.actual_departure_utc_millis,
            record.scheduled_arrival_utc_millis,
            record.actual_arrival_utc_millis,
            record.recorded_at_millis,
        ],
    )?;
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FlightRecord> {
    Ok(FlightRecord {
        id: row.get(0)?,
        flight_iata: row.get(1)?,
        origin_iata: row.get(2)?,
        destination_iata: row.get(3)?,
        flight_date: row.get(4)?,
        scheduled_departure_utc_millis: row.get(5)?,
        actual_departure_utc_millis: row.get(6)?,
        scheduled_arrival_utc_millis: row.get(7)?,
        actual_arrival_utc_millis: row.get(8)?,
        recorded_at_millis: row.get(9)?,
    })
}
