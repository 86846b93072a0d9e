use crate::error::{Result, RowragError};
use rusqlite::Connection;

use super::migrate;

pub const EXPECTED_TABLES: &[&str] = &[
    "ingested_records",
    "ingestion_jobs",
    "legal_documents",
    "schema_migrations",
    "work_queue",
];

pub const EXPECTED_TRIGGERS: &[&str] = &[
    "legal_documents_fts_delete",
    "legal_documents_fts_insert",
    "legal_documents_fts_update",
];

const EXPECTED_MIGRATIONS: usize = 4;

fn names(conn: &Connection, kind: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")?;
    let names = stmt
        .query_map([kind], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

fn missing<'a>(expected: &[&'a str], present: &[String]) -> Vec<&'a str> {
    expected
        .iter()
        .filter(|name| !present.iter().any(|p| p == *name))
        .copied()
        .collect()
}

/// Check that migrations produced every table, the FTS index and its
/// triggers, and that the connection pragmas took effect.
pub fn verify_schema(conn: &Connection) -> Result<()> {
    let tables = names(conn, "table")?;
    let absent = missing(EXPECTED_TABLES, &tables);
    if !absent.is_empty() {
        for table in &absent {
            log::error!("Missing table: {}", table);
        }
        return Err(RowragError::Config(format!("Missing tables: {}", absent.join(", "))));
    }

    if !tables.iter().any(|t| t == "legal_documents_fts") {
        return Err(RowragError::Config(
            "FTS5 virtual table 'legal_documents_fts' does not exist".to_string(),
        ));
    }
    log::debug!("✓ FTS5 virtual table exists");

    let triggers = names(conn, "trigger")?;
    let absent = missing(EXPECTED_TRIGGERS, &triggers);
    if !absent.is_empty() {
        return Err(RowragError::Config(format!("Missing triggers: {}", absent.join(", "))));
    }

    let applied = migrate::get_applied_migrations(conn)?;
    if applied.len() < EXPECTED_MIGRATIONS {
        return Err(RowragError::Config(format!(
            "Expected at least {} migrations, found {}",
            EXPECTED_MIGRATIONS,
            applied.len()
        )));
    }
    log::debug!("✓ {} migrations applied", applied.len());

    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !journal_mode.eq_ignore_ascii_case("wal") {
        return Err(RowragError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
    }

    let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(RowragError::Config("Foreign keys not enabled".to_string()));
    }

    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if integrity != "ok" {
        return Err(RowragError::Config(format!(
            "Database integrity check failed: {}",
            integrity
        )));
    }
    log::info!("✓ Database integrity: OK");

    Ok(())
}
