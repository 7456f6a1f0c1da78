use super::store::{next_record, now_ms, LeaseRecord, LeaseStore};
use crate::sqlite_column;
use crate::sqlite_persistence::{open_or_create, SqlType, Table, VersionedSchema};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

const LEASES_TABLE_V1: Table = Table {
    name: "leases",
    columns: &[
        sqlite_column!("name", SqlType::Text, is_primary_key = true),
        sqlite_column!("holder", SqlType::Text, non_null = true),
        sqlite_column!("acquired_at", SqlType::Integer, non_null = true),
        sqlite_column!("renewed_at", SqlType::Integer, non_null = true),
        sqlite_column!("expires_at", SqlType::Integer, non_null = true),
        sqlite_column!(
            "transitions",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
};

pub const LEASE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[LEASES_TABLE_V1],
}];

/// Lease store on a SQLite file shared by every replica.
///
/// Each acquire/renew runs inside an IMMEDIATE transaction so the read and
/// the conditional write are serialized across processes by SQLite's lock.
pub struct SqliteLeaseStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLeaseStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if !path.exists() {
            info!("Creating new lease database at {:?}", path);
        }
        let conn = Connection::open(path).context("Failed to open lease database")?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        open_or_create(&conn, LEASE_VERSIONED_SCHEMAS, "Lease")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("lease connection lock poisoned"))
    }

    fn read_record(conn: &Connection, name: &str) -> Result<Option<LeaseRecord>> {
        let record = conn
            .query_row(
                "SELECT name, holder, acquired_at, renewed_at, expires_at, transitions
                 FROM leases WHERE name = ?1",
                params![name],
                |row| {
                    Ok(LeaseRecord {
                        name: row.get("name")?,
                        holder: row.get("holder")?,
                        acquired_at_ms: row.get("acquired_at")?,
                        renewed_at_ms: row.get("renewed_at")?,
                        expires_at_ms: row.get("expires_at")?,
                        transitions: row.get("transitions")?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

impl LeaseStore for SqliteLeaseStore {
    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        open_or_create(&conn, LEASE_VERSIONED_SCHEMAS, "Lease")
    }

    fn try_acquire_or_renew(&self, name: &str, identity: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = Self::read_record(&tx, name)?;
        let Some(record) = next_record(existing.as_ref(), name, identity, now_ms(), ttl) else {
            return Ok(false);
        };

        tx.execute(
            "INSERT INTO leases (name, holder, acquired_at, renewed_at, expires_at, transitions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                renewed_at = excluded.renewed_at,
                expires_at = excluded.expires_at,
                transitions = excluded.transitions",
            params![
                record.name,
                record.holder,
                record.acquired_at_ms,
                record.renewed_at_ms,
                record.expires_at_ms,
                record.transitions,
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn get(&self, name: &str) -> Result<Option<LeaseRecord>> {
        let conn = self.lock()?;
        Self::read_record(&conn, name)
    }

    fn release(&self, name: &str, identity: &str) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE leases SET holder = '', expires_at = ?1 WHERE name = ?2 AND holder = ?3",
            params![now_ms(), name, identity],
        )?;
        Ok(updated > 0)
    }
}
