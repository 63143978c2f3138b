//! SQLite database storage backend
//!
//! This backend stores requirements, types and statuses in a SQLite file.
//! Uniqueness of `(type_id, num_path)` and subtree deletion are delegated
//! to the schema (`idx_req_type_num`, `ON DELETE CASCADE`).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::{ReqError, Result};
use crate::models::{
    default_statuses, default_types, OrderUpdate, Requirement, RequirementChanges,
    RequirementId, RequirementInsert, RequirementType, Snapshot, Status, StatusFields,
    StatusId, TypeFields, TypeId, DB_VERSION,
};

use super::migration;
use super::traits::{BackendType, DatabaseConfig, RequirementStore};

const REQUIREMENT_COLUMNS: &str = "id, type_id, num_path, display_code, title, description_md, \
     rationale_md, parent_id, order_index, status_id, source, created_at, updated_at";

/// SQLite backend implementation
pub struct SqliteBackend {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (creating if needed) a database file, migrating older layouts
    /// and seeding defaults into empty tables
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(&DatabaseConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let path = config.path.clone();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        let backend = Self {
            path: Some(path),
            conn: Mutex::new(conn),
        };
        backend.init(config.reset_defaults)?;
        Ok(backend)
    }

    /// Opens a private database that lives only as long as the backend
    pub fn in_memory() -> Result<Self> {
        let backend = Self {
            path: None,
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        backend.init(false)?;
        Ok(backend)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ReqError::Poisoned)
    }

    fn init(&self, reset: bool) -> Result<()> {
        let conn = self.conn()?;
        prepare_connection(&conn)?;
        if reset {
            reset_tables(&conn)?;
        }
        Ok(())
    }

    /// Writes a consistent copy of the database to `target`, replacing any
    /// file already there
    pub fn save_copy(&self, target: &Path) -> Result<()> {
        if target.exists() {
            std::fs::remove_file(target)?;
        }
        let conn = self.conn()?;
        conn.execute("VACUUM INTO ?1", [target.to_string_lossy().as_ref()])?;
        info!("Saved database copy to {}", target.display());
        Ok(())
    }

    /// Replaces the working database with the contents of `source`.
    ///
    /// The source must pass [`migration::validate_database_file`]; the
    /// working database is left untouched otherwise.
    pub fn replace_with(&self, source: &Path) -> Result<()> {
        migration::validate_database_file(source, None)?;

        let Some(path) = &self.path else {
            return Err(ReqError::IncompatibleDatabase(
                "an in-memory database has no file to replace".to_string(),
            ));
        };

        let staged = path.with_extension("import");
        std::fs::copy(source, &staged)?;
        // Upgrade the staged copy while the working file is still live.
        if let Err(e) = open_prepared(&staged).and_then(close_connection) {
            discard_staged(&staged);
            return Err(e);
        }

        let mut conn = self.conn()?;
        install_staged(&mut conn, &staged, path)?;
        info!("Imported database from {}", source.display());
        Ok(())
    }
}

fn open_prepared(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    prepare_connection(&conn)?;
    Ok(conn)
}

fn close_connection(conn: Connection) -> Result<()> {
    conn.close().map_err(|(_, e)| ReqError::Sqlite(e))
}

fn discard_staged(staged: &Path) {
    if let Err(e) = std::fs::remove_file(staged) {
        warn!("Could not remove staged import {}: {}", staged.display(), e);
    }
}

/// Moves `staged` over `path` and points `conn` at the result. When the
/// move fails, `conn` is reopened on the untouched original file.
fn install_staged(conn: &mut Connection, staged: &Path, path: &Path) -> Result<()> {
    let old = std::mem::replace(conn, Connection::open_in_memory()?);
    if let Err((old, e)) = old.close() {
        *conn = old;
        discard_staged(staged);
        return Err(e.into());
    }

    if let Err(e) = std::fs::rename(staged, path) {
        warn!("Import of {} failed, reopening {}", staged.display(), path.display());
        if staged.exists() {
            discard_staged(staged);
        }
        *conn = open_prepared(path)?;
        return Err(e.into());
    }
    *conn = open_prepared(path)?;
    Ok(())
}

/// Brings a freshly opened connection to the current layout
fn prepare_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    migration::migrate_legacy_layout(conn)?;
    conn.execute_batch(include_str!("schema.sql"))?;
    seed_defaults(conn)?;
    ensure_db_version(conn)?;
    Ok(())
}

fn seed_defaults(conn: &Connection) -> Result<()> {
    let statuses: i64 = conn.query_row("SELECT COUNT(*) FROM statuses", [], |row| row.get(0))?;
    if statuses == 0 {
        for status in default_statuses() {
            conn.execute(
                "INSERT INTO statuses (id, name, color, order_index) VALUES (?1, ?2, ?3, ?4)",
                params![status.id, status.name, status.color, status.order_index],
            )?;
        }
        debug!("Seeded default statuses");
    }

    let types: i64 = conn.query_row("SELECT COUNT(*) FROM types", [], |row| row.get(0))?;
    if types == 0 {
        for ty in default_types() {
            conn.execute(
                "INSERT INTO types (id, type_code, name, color, icon, order_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ty.id, ty.type_code, ty.name, ty.color, ty.icon, ty.order_index],
            )?;
        }
        debug!("Seeded default types");
    }
    Ok(())
}

fn ensure_db_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO db_version (key, value) VALUES ('db_version', ?1)",
        [DB_VERSION],
    )?;
    Ok(())
}

fn reset_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM requirements;
         DELETE FROM statuses;
         DELETE FROM types;
         DELETE FROM db_version;",
    )?;
    seed_defaults(conn)?;
    ensure_db_version(conn)?;
    info!("Database reset to defaults");
    Ok(())
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn requirement_from_row(row: &Row<'_>) -> rusqlite::Result<Requirement> {
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    Ok(Requirement {
        id: row.get(0)?,
        type_id: row.get(1)?,
        num_path: row.get(2)?,
        display_code: row.get(3)?,
        title: row.get(4)?,
        description_md: row.get(5)?,
        rationale_md: row.get(6)?,
        parent_id: row.get(7)?,
        order_index: row.get(8)?,
        status_id: row.get(9)?,
        source: row.get(10)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn type_from_row(row: &Row<'_>) -> rusqlite::Result<RequirementType> {
    Ok(RequirementType {
        id: row.get(0)?,
        type_code: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        icon: row.get(4)?,
        order_index: row.get(5)?,
    })
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<Status> {
    Ok(Status {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        order_index: row.get(3)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn exists(conn: &Connection, table: &str, id: i64) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table);
    Ok(conn
        .query_row(&sql, [id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn check_references(
    conn: &Connection,
    type_id: TypeId,
    status_id: StatusId,
    parent_id: Option<RequirementId>,
) -> Result<()> {
    if !exists(conn, "types", type_id)? {
        return Err(ReqError::TypeNotFound(type_id));
    }
    if !exists(conn, "statuses", status_id)? {
        return Err(ReqError::StatusNotFound(status_id));
    }
    if let Some(parent_id) = parent_id {
        if !exists(conn, "requirements", parent_id)? {
            return Err(ReqError::ParentNotFound(parent_id));
        }
    }
    Ok(())
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

/// Runs `UPDATE <table> SET ... WHERE id = ?` for the given assignments
fn update_columns(
    conn: &Connection,
    table: &str,
    id: i64,
    columns: Vec<(&str, Value)>,
) -> rusqlite::Result<usize> {
    if columns.is_empty() {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table),
            [id],
            |row| row.get(0),
        )?;
        return Ok(count as usize);
    }
    let set_clause = columns
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("{} = ?{}", name, i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE {} SET {} WHERE id = ?{}", table, set_clause, columns.len() + 1);
    let mut values: Vec<Value> = columns.into_iter().map(|(_, v)| v).collect();
    values.push(Value::Integer(id));
    conn.execute(&sql, params_from_iter(values.iter()))
}

impl RequirementStore for SqliteBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn list_requirements(&self) -> Result<Vec<Requirement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM requirements ORDER BY parent_id, order_index, id",
            REQUIREMENT_COLUMNS
        ))?;
        let rows = stmt.query_map([], requirement_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_requirement(&self, id: RequirementId) -> Result<Option<Requirement>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM requirements WHERE id = ?1", REQUIREMENT_COLUMNS),
                [id],
                requirement_from_row,
            )
            .optional()?)
    }

    fn insert_requirement(&self, insert: &RequirementInsert) -> Result<RequirementId> {
        let conn = self.conn()?;
        check_references(&conn, insert.type_id, insert.status_id, insert.parent_id)?;
        let stamp = insert.created_at.to_rfc3339();
        let result = conn.execute(
            "INSERT INTO requirements
             (type_id, num_path, display_code, title, description_md, rationale_md, parent_id,
              order_index, status_id, source, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                insert.type_id,
                insert.num_path,
                insert.display_code,
                insert.title,
                insert.description_md,
                insert.rationale_md,
                insert.parent_id,
                insert.order_index,
                insert.status_id,
                insert.source,
                stamp,
                stamp,
            ],
        );
        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(ReqError::DuplicateCode {
                type_id: insert.type_id,
                num_path: insert.num_path.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn update_requirement(&self, id: RequirementId, changes: &RequirementChanges) -> Result<bool> {
        let conn = self.conn()?;
        let Some(mut merged) = conn
            .query_row(
                &format!("SELECT {} FROM requirements WHERE id = ?1", REQUIREMENT_COLUMNS),
                [id],
                requirement_from_row,
            )
            .optional()?
        else {
            return Ok(false);
        };
        merged.apply(changes);
        check_references(&conn, merged.type_id, merged.status_id, merged.parent_id)?;

        let mut columns: Vec<(&str, Value)> = Vec::new();
        if let Some(type_id) = changes.type_id {
            columns.push(("type_id", Value::Integer(type_id)));
        }
        if let Some(num_path) = &changes.num_path {
            columns.push(("num_path", Value::Text(num_path.clone())));
        }
        if let Some(display_code) = &changes.display_code {
            columns.push(("display_code", opt_text(display_code)));
        }
        if let Some(title) = &changes.title {
            columns.push(("title", Value::Text(title.clone())));
        }
        if let Some(description_md) = &changes.description_md {
            columns.push(("description_md", Value::Text(description_md.clone())));
        }
        if let Some(rationale_md) = &changes.rationale_md {
            columns.push(("rationale_md", opt_text(rationale_md)));
        }
        if let Some(parent_id) = changes.parent_id {
            columns.push(("parent_id", parent_id.map(Value::Integer).unwrap_or(Value::Null)));
        }
        if let Some(order_index) = changes.order_index {
            columns.push(("order_index", Value::Integer(order_index)));
        }
        if let Some(status_id) = changes.status_id {
            columns.push(("status_id", Value::Integer(status_id)));
        }
        if let Some(source) = &changes.source {
            columns.push(("source", opt_text(source)));
        }
        columns.push(("updated_at", Value::Text(Utc::now().to_rfc3339())));

        match update_columns(&conn, "requirements", id, columns) {
            Ok(rows) => Ok(rows > 0),
            Err(e) if is_unique_violation(&e) => Err(ReqError::DuplicateCode {
                type_id: merged.type_id,
                num_path: merged.num_path,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_requirement_cascade(&self, id: RequirementId) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let count: i64 = tx.query_row(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT id FROM requirements WHERE id = ?1
                 UNION ALL
                 SELECT r.id FROM requirements r JOIN subtree s ON r.parent_id = s.id
             )
             SELECT COUNT(*) FROM subtree",
            [id],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM requirements WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(count as usize)
    }

    fn apply_order_updates(&self, updates: &[OrderUpdate]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let stamp = Utc::now().to_rfc3339();
        for update in updates {
            let rows = tx.execute(
                "UPDATE requirements SET order_index = ?1, updated_at = ?2 WHERE id = ?3",
                params![update.order_index, stamp, update.id],
            )?;
            if rows == 0 {
                // Dropping the transaction rolls back earlier rows.
                return Err(ReqError::RequirementNotFound(update.id));
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list_types(&self) -> Result<Vec<RequirementType>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, type_code, name, color, icon, order_index FROM types ORDER BY order_index, id",
        )?;
        let rows = stmt.query_map([], type_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_type(&self, fields: &TypeFields) -> Result<TypeId> {
        let conn = self.conn()?;
        let type_code = fields.type_code.clone().unwrap_or_default();
        let result = conn.execute(
            "INSERT INTO types (type_code, name, color, icon, order_index) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                type_code,
                fields.name.clone().unwrap_or_default(),
                fields.color.clone().flatten(),
                fields.icon.clone().flatten(),
                fields.order_index.unwrap_or(0),
            ],
        );
        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(ReqError::DuplicateTypeCode(type_code)),
            Err(e) => Err(e.into()),
        }
    }

    fn update_type(&self, id: TypeId, fields: &TypeFields) -> Result<bool> {
        let conn = self.conn()?;
        let mut columns: Vec<(&str, Value)> = Vec::new();
        if let Some(code) = &fields.type_code {
            columns.push(("type_code", Value::Text(code.clone())));
        }
        if let Some(name) = &fields.name {
            columns.push(("name", Value::Text(name.clone())));
        }
        if let Some(color) = &fields.color {
            columns.push(("color", opt_text(color)));
        }
        if let Some(icon) = &fields.icon {
            columns.push(("icon", opt_text(icon)));
        }
        if let Some(order_index) = fields.order_index {
            columns.push(("order_index", Value::Integer(order_index)));
        }
        match update_columns(&conn, "types", id, columns) {
            Ok(rows) => Ok(rows > 0),
            Err(e) if is_unique_violation(&e) => Err(ReqError::DuplicateTypeCode(
                fields.type_code.clone().unwrap_or_default(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_type(&self, id: TypeId) -> Result<bool> {
        let conn = self.conn()?;
        let used: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requirements WHERE type_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if used > 0 {
            return Err(ReqError::TypeInUse(id));
        }
        Ok(conn.execute("DELETE FROM types WHERE id = ?1", [id])? > 0)
    }

    fn list_statuses(&self) -> Result<Vec<Status>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, color, order_index FROM statuses ORDER BY order_index, id")?;
        let rows = stmt.query_map([], status_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_status(&self, fields: &StatusFields) -> Result<StatusId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO statuses (name, color, order_index) VALUES (?1, ?2, ?3)",
            params![
                fields.name.clone().unwrap_or_default(),
                fields.color.clone().flatten(),
                fields.order_index.unwrap_or(0),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_status(&self, id: StatusId, fields: &StatusFields) -> Result<bool> {
        let conn = self.conn()?;
        let mut columns: Vec<(&str, Value)> = Vec::new();
        if let Some(name) = &fields.name {
            columns.push(("name", Value::Text(name.clone())));
        }
        if let Some(color) = &fields.color {
            columns.push(("color", opt_text(color)));
        }
        if let Some(order_index) = fields.order_index {
            columns.push(("order_index", Value::Integer(order_index)));
        }
        Ok(update_columns(&conn, "statuses", id, columns)? > 0)
    }

    fn delete_status(&self, id: StatusId) -> Result<bool> {
        let conn = self.conn()?;
        let used: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requirements WHERE status_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if used > 0 {
            return Err(ReqError::StatusInUse(id));
        }
        Ok(conn.execute("DELETE FROM statuses WHERE id = ?1", [id])? > 0)
    }

    fn count_requirements_with_type(&self, id: TypeId) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requirements WHERE type_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_requirements_with_status(&self, id: StatusId) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requirements WHERE status_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT value FROM db_version WHERE key = ?1", [key], |row| row.get(0))
            .optional()?)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO db_version (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn list_meta(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, COALESCE(value, '') FROM db_version ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn reset_defaults(&self) -> Result<()> {
        let conn = self.conn()?;
        reset_tables(&conn)
    }

    fn replace_contents(&self, snapshot: &Snapshot) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM requirements;
             DELETE FROM statuses;
             DELETE FROM types;",
        )?;
        for ty in &snapshot.types {
            let result = tx.execute(
                "INSERT INTO types (id, type_code, name, color, icon, order_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ty.id, ty.type_code, ty.name, ty.color, ty.icon, ty.order_index],
            );
            match result {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(ReqError::DuplicateTypeCode(ty.type_code.clone()))
                }
                Err(e) => return Err(e.into()),
            }
        }
        for status in &snapshot.statuses {
            tx.execute(
                "INSERT INTO statuses (id, name, color, order_index) VALUES (?1, ?2, ?3, ?4)",
                params![status.id, status.name, status.color, status.order_index],
            )?;
        }
        for req in &snapshot.requirements {
            check_references(&tx, req.type_id, req.status_id, req.parent_id)?;
            let result = tx.execute(
                &format!(
                    "INSERT INTO requirements ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    REQUIREMENT_COLUMNS
                ),
                params![
                    req.id,
                    req.type_id,
                    req.num_path,
                    req.display_code,
                    req.title,
                    req.description_md,
                    req.rationale_md,
                    req.parent_id,
                    req.order_index,
                    req.status_id,
                    req.source,
                    req.created_at.to_rfc3339(),
                    req.updated_at.to_rfc3339(),
                ],
            );
            match result {
                Ok(_) => {}
                // Dropping the transaction restores the previous contents.
                Err(e) if is_unique_violation(&e) => {
                    return Err(ReqError::DuplicateCode {
                        type_id: req.type_id,
                        num_path: req.num_path.clone(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
        ensure_db_version(&tx)?;
        tx.commit()?;
        info!("Replaced database contents with {} requirements", snapshot.requirements.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn insert(type_id: TypeId, num_path: &str, parent_id: Option<RequirementId>) -> RequirementInsert {
        RequirementInsert {
            type_id,
            num_path: num_path.to_string(),
            display_code: None,
            title: format!("req {}", num_path),
            description_md: "text".to_string(),
            rationale_md: None,
            parent_id,
            order_index: 0,
            status_id: 1,
            source: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sqlite_backend_create_and_seed() {
        let dir = TempDir::new().unwrap();
        let backend = SqliteBackend::new(dir.path().join("requirements.db")).unwrap();

        assert!(backend.list_requirements().unwrap().is_empty());
        assert_eq!(backend.list_types().unwrap().len(), 3);
        assert_eq!(backend.list_statuses().unwrap()[0].name, "Draft");
        assert_eq!(backend.get_meta("db_version").unwrap().as_deref(), Some(DB_VERSION));
    }

    #[test]
    fn test_sqlite_backend_requirement_crud() {
        let backend = SqliteBackend::in_memory().unwrap();

        let id = backend.insert_requirement(&insert(1, "0", None)).unwrap();
        let loaded = backend.get_requirement(id).unwrap().unwrap();
        assert_eq!(loaded.num_path, "0");
        assert_eq!(loaded.title, "req 0");

        let changes = RequirementChanges {
            title: Some("Renamed".to_string()),
            rationale_md: Some(Some("because".to_string())),
            ..Default::default()
        };
        assert!(backend.update_requirement(id, &changes).unwrap());
        let loaded = backend.get_requirement(id).unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(loaded.rationale_md.as_deref(), Some("because"));

        assert!(!backend.update_requirement(999, &changes).unwrap());
        assert_eq!(backend.delete_requirement_cascade(id).unwrap(), 1);
        assert!(backend.get_requirement(id).unwrap().is_none());
    }

    #[test]
    fn test_sqlite_backend_duplicate_code_on_insert_and_update() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.insert_requirement(&insert(1, "0", None)).unwrap();
        let second = backend.insert_requirement(&insert(1, "1", None)).unwrap();

        let err = backend.insert_requirement(&insert(1, "0", None)).unwrap_err();
        assert!(matches!(err, ReqError::DuplicateCode { type_id: 1, ref num_path } if num_path == "0"));

        let clash = RequirementChanges {
            num_path: Some("0".to_string()),
            ..Default::default()
        };
        assert!(backend.update_requirement(second, &clash).unwrap_err().is_duplicate_code());
    }

    #[test]
    fn test_sqlite_backend_missing_parent() {
        let backend = SqliteBackend::in_memory().unwrap();
        let err = backend.insert_requirement(&insert(1, "0.0", Some(42))).unwrap_err();
        assert!(matches!(err, ReqError::ParentNotFound(42)));
    }

    #[test]
    fn test_sqlite_backend_cascade_delete_counts_subtree() {
        let backend = SqliteBackend::in_memory().unwrap();
        let root = backend.insert_requirement(&insert(1, "0", None)).unwrap();
        let child = backend.insert_requirement(&insert(2, "0.0", Some(root))).unwrap();
        backend.insert_requirement(&insert(2, "0.0.0", Some(child))).unwrap();
        backend.insert_requirement(&insert(3, "0.0", Some(root))).unwrap();
        let keep = backend.insert_requirement(&insert(1, "1", None)).unwrap();

        assert_eq!(backend.delete_requirement_cascade(root).unwrap(), 4);
        let ids: Vec<_> = backend.list_requirements().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![keep]);
    }

    #[test]
    fn test_sqlite_backend_order_updates_roll_back() {
        let backend = SqliteBackend::in_memory().unwrap();
        let a = backend.insert_requirement(&insert(1, "0", None)).unwrap();
        let b = backend.insert_requirement(&insert(1, "1", None)).unwrap();

        let err = backend
            .apply_order_updates(&[
                OrderUpdate { id: a, order_index: 1 },
                OrderUpdate { id: 999, order_index: 0 },
            ])
            .unwrap_err();
        assert!(matches!(err, ReqError::RequirementNotFound(999)));
        assert_eq!(backend.get_requirement(a).unwrap().unwrap().order_index, 0);

        backend
            .apply_order_updates(&[
                OrderUpdate { id: a, order_index: 1 },
                OrderUpdate { id: b, order_index: 0 },
            ])
            .unwrap();
        assert_eq!(backend.get_requirement(a).unwrap().unwrap().order_index, 1);
        assert_eq!(backend.get_requirement(b).unwrap().unwrap().order_index, 0);
    }

    #[test]
    fn test_sqlite_backend_types_and_statuses() {
        let backend = SqliteBackend::in_memory().unwrap();
        let id = backend
            .insert_type(&TypeFields {
                type_code: Some("SW".to_string()),
                name: Some("Software".to_string()),
                order_index: Some(9),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(backend.list_types().unwrap().last().unwrap().id, id);

        let dup = backend.insert_type(&TypeFields {
            type_code: Some("SW".to_string()),
            name: Some("Again".to_string()),
            ..Default::default()
        });
        assert!(matches!(dup, Err(ReqError::DuplicateTypeCode(_))));

        backend.insert_requirement(&insert(id, "0", None)).unwrap();
        assert!(matches!(backend.delete_type(id), Err(ReqError::TypeInUse(_))));
        assert!(matches!(backend.delete_status(1), Err(ReqError::StatusInUse(1))));
        assert_eq!(backend.count_requirements_with_type(id).unwrap(), 1);

        assert!(backend
            .update_status(2, &StatusFields { name: Some("Review".to_string()), ..Default::default() })
            .unwrap());
        assert_eq!(backend.list_statuses().unwrap()[1].name, "Review");
        assert!(backend.delete_status(6).unwrap());
    }

    #[test]
    fn test_sqlite_backend_reset_defaults() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.insert_requirement(&insert(1, "0", None)).unwrap();
        backend.set_meta("requirement_version", "2.0").unwrap();
        backend.reset_defaults().unwrap();

        assert!(backend.list_requirements().unwrap().is_empty());
        assert_eq!(backend.get_meta("requirement_version").unwrap(), None);
        assert_eq!(backend.get_meta("db_version").unwrap().as_deref(), Some(DB_VERSION));
        assert_eq!(backend.list_types().unwrap().len(), 3);
    }

    #[test]
    fn test_sqlite_backend_save_copy_and_replace() {
        let dir = TempDir::new().unwrap();
        let working = SqliteBackend::new(dir.path().join("working.db")).unwrap();
        working.insert_requirement(&insert(1, "0", None)).unwrap();

        let copy = dir.path().join("copy.ReqDB");
        working.save_copy(&copy).unwrap();

        let other = SqliteBackend::new(dir.path().join("other.db")).unwrap();
        assert!(other.list_requirements().unwrap().is_empty());
        other.replace_with(&copy).unwrap();
        assert_eq!(other.list_requirements().unwrap().len(), 1);
        assert!(!dir.path().join("other.import").exists());
    }

    #[test]
    fn test_failed_install_reopens_working_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("working.db");
        let backend = SqliteBackend::new(&path).unwrap();
        backend.insert_requirement(&insert(1, "0", None)).unwrap();

        {
            let mut conn = backend.conn().unwrap();
            let missing = dir.path().join("never-staged.import");
            assert!(install_staged(&mut conn, &missing, &path).is_err());
        }

        // Still the file-backed, seeded database rather than an empty one.
        assert_eq!(backend.list_requirements().unwrap()[0].num_path, "0");
        assert_eq!(backend.list_types().unwrap().len(), 3);
        backend.insert_requirement(&insert(1, "1", None)).unwrap();
        drop(backend);
        assert_eq!(SqliteBackend::new(&path).unwrap().list_requirements().unwrap().len(), 2);
    }
}
