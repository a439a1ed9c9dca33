//! SQLite connection setup and timestamp encoding shared by the stores.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a file-backed connection configured for several writers.
///
/// The manifest store and the task queues each hold their own connection to
/// the same file, possibly from different processes.
pub(crate) fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    // journal_mode returns the resulting mode as a row
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(conn)
}

pub(crate) fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

/// Fixed-width UTC encoding so stored timestamps sort lexically.
pub(crate) fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn from_db_time_opt(value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db_time).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_time_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1500);
        assert_eq!(to_db_time(&a), "2024-03-01T12:00:00.000000Z");
        assert_eq!(to_db_time(&a).len(), to_db_time(&b).len());
        assert!(to_db_time(&a) < to_db_time(&b));
    }

    #[test]
    fn test_db_time_parses_back() {
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 15).unwrap();
        assert_eq!(from_db_time(&to_db_time(&a)).unwrap(), a);
        assert!(from_db_time("not a time").is_err());
        assert_eq!(from_db_time_opt(None).unwrap(), None);
    }

    #[test]
    fn test_open_enables_foreign_keys() {
        let conn = open_in_memory().unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
