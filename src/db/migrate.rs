//! Forward-only SQL migrations.
//!
//! Files are named `NNN_description.sql` and applied in version order. Each
//! runs in its own transaction together with its `schema_migrations` row, so a
//! broken file leaves neither partial schema nor a record of having run.

use crate::error::{Result, RowragError};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

struct Migration {
    version: u32,
    name: String,
    sql: String,
}

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

/// Names of applied migrations, lowest version first
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

/// `003_work_queue.sql` -> `(3, "003_work_queue")`
fn parse_file_name(file_name: &str) -> Result<(u32, String)> {
    let stem = file_name
        .strip_suffix(".sql")
        .ok_or_else(|| RowragError::Config(format!("Not a migration file: {}", file_name)))?;
    let version = stem
        .split_once('_')
        .and_then(|(v, _)| v.parse().ok())
        .ok_or_else(|| RowragError::Config(format!("Invalid migration filename: {}", file_name)))?;
    Ok((version, stem.to_string()))
}

fn load_migrations(dir: &Path) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            continue;
        }
        let (version, name) = parse_file_name(file_name)?;
        migrations.push(Migration {
            version,
            name,
            sql: fs::read_to_string(&path)?,
        });
    }

    migrations.sort_by_key(|m| m.version);
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(RowragError::Config(format!(
            "Duplicate migration version {}: {} and {}",
            pair[0].version, pair[0].name, pair[1].name
        )));
    }
    Ok(migrations)
}

/// Apply every migration in `dir` not yet recorded. Returns how many ran.
pub fn run_migrations(conn: &mut Connection, dir: &Path) -> Result<usize> {
    conn.execute(TRACKING_TABLE, [])?;
    let applied: HashSet<String> = get_applied_migrations(conn)?.into_iter().collect();

    let mut count = 0;
    for migration in load_migrations(dir)? {
        if applied.contains(&migration.name) {
            continue;
        }
        log::info!("Applying migration {}", migration.name);

        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql)
            .map_err(|source| RowragError::Migration {
                name: migration.name.clone(),
                source,
            })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
        count += 1;
    }

    if count > 0 {
        log::info!("{} migration(s) applied", count);
    }
    Ok(count)
}
