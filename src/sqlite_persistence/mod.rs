//! Minimal declarative schema support for the SQLite-backed stores.
//!
//! A store declares its tables as `VersionedSchema` constants. New databases
//! are created from the latest schema; existing ones are checked against the
//! schema recorded in `PRAGMA user_version`.

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Offset added to schema versions when stored in `PRAGMA user_version`.
pub const BASE_DB_VERSION: usize = 7000;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = $crate::sqlite_persistence::Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "TEXT" => Some(SqlType::Text),
            "INTEGER" => Some(SqlType::Integer),
            _ => None,
        }
    }
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl Table {
    fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", c.name, c.sql_type.as_sql());
                if c.is_primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if c.non_null {
                    def.push_str(" NOT NULL");
                }
                if let Some(default) = c.default_value {
                    def.push_str(&format!(" DEFAULT {}", default));
                }
                def
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({});", self.name, columns)
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual: Vec<(String, String, bool, bool)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)? == 1,
                    row.get::<_, i32>(5)? == 1,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        if actual.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}",
                self.name,
                actual.len(),
                self.columns.len()
            );
        }

        for ((name, sql_type, non_null, is_pk), expected) in actual.iter().zip(self.columns) {
            if name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    name
                );
            }
            if SqlType::parse(sql_type) != Some(expected.sql_type) {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}, got {}",
                    self.name,
                    name,
                    expected.sql_type,
                    sql_type
                );
            }
            if *non_null != expected.non_null || *is_pk != expected.is_primary_key {
                bail!(
                    "Table {} column {} constraint mismatch",
                    self.name,
                    name
                );
            }
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            conn.execute(&table.create_sql(), [])
                .with_context(|| format!("Failed to create table {}", table.name))?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Create the latest schema on an empty database or validate an existing one.
///
/// The version check and the creation run in one IMMEDIATE transaction, so
/// processes opening the same new file concurrently create it exactly once.
pub fn open_or_create(conn: &Connection, schemas: &[VersionedSchema], label: &str) -> Result<()> {
    let latest = match schemas.last() {
        Some(schema) => schema,
        None => bail!("No schema declared for {} database", label),
    };

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .with_context(|| format!("Failed to lock {} database", label))?;

    let raw_version: i64 = tx.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if raw_version == 0 {
        latest.create(&tx)?;
        tx.commit()?;
        return Ok(());
    }

    let db_version = raw_version - BASE_DB_VERSION as i64;
    let schema = schemas
        .iter()
        .find(|s| s.version as i64 == db_version)
        .with_context(|| format!("Unknown {} database version {}", label, db_version))?;
    schema
        .validate(&tx)
        .with_context(|| format!("{} database schema validation failed", label))?;

    if schema.version != latest.version {
        bail!(
            "{} database is at version {}, expected {}",
            label,
            schema.version,
            latest.version
        );
    }
    tx.commit()?;
    Ok(())
}
