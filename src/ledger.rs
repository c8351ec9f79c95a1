use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Persisted record of which events have already been relayed.
///
/// Backed by a single SQLite table mapping event id to the time it was
/// relayed. Entries older than the retention horizon count as evicted:
/// `is_new` ignores them and `mark_relayed` purges them lazily, so the
/// store stays bounded without a background sweeper.
#[derive(Clone)]
pub struct DedupLedger {
    conn: Arc<Mutex<Connection>>,
    horizon: Duration,
}

impl DedupLedger {
    /// Open or create the ledger database at the given path.
    pub fn open(path: &Path, horizon_hours: i64) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ledger database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("Dedup ledger initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            horizon: Duration::hours(horizon_hours),
        })
    }

    /// Open an in-memory ledger (for testing)
    pub fn open_in_memory(horizon_hours: i64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            horizon: Duration::hours(horizon_hours),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS relayed_events (
                event_id TEXT PRIMARY KEY,
                relayed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_relayed_events_time
                ON relayed_events(relayed_at);
            ",
        )
        .context("Failed to run ledger migrations")?;
        Ok(())
    }

    /// True if the event has not been relayed within the retention horizon.
    pub async fn is_new(&self, event_id: &str) -> Result<bool> {
        let cutoff = self.cutoff().to_rfc3339();
        let conn = self.conn.lock().await;

        let seen: bool = conn
            .query_row(
                "SELECT count(*) > 0 FROM relayed_events
                 WHERE event_id = ?1 AND relayed_at > ?2",
                rusqlite::params![event_id, cutoff],
                |row| row.get(0),
            )
            .context("Failed to query ledger")?;

        Ok(!seen)
    }

    /// Record a confirmed relay and lazily purge expired entries.
    pub async fn mark_relayed(&self, event_id: &str) -> Result<()> {
        let cutoff = self.cutoff().to_rfc3339();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().await;

        let purged = conn
            .execute(
                "DELETE FROM relayed_events WHERE relayed_at <= ?1",
                rusqlite::params![cutoff],
            )
            .context("Failed to purge expired ledger entries")?;
        if purged > 0 {
            debug!("Purged {} expired ledger entries", purged);
        }

        conn.execute(
            "INSERT OR REPLACE INTO relayed_events (event_id, relayed_at) VALUES (?1, ?2)",
            rusqlite::params![event_id, now],
        )
        .context("Failed to record relayed event")?;

        Ok(())
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.horizon
    }

    #[cfg(test)]
    async fn insert_at(&self, event_id: &str, relayed_at: DateTime<Utc>) {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO relayed_events (event_id, relayed_at) VALUES (?1, ?2)",
            rusqlite::params![event_id, relayed_at.to_rfc3339()],
        )
        .unwrap();
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT count(*) FROM relayed_events", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap() as usize
    }
}
