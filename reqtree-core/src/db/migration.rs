//! Database file maintenance
//!
//! Upgrades older database layouts in place, validates files before they
//! replace the working database, and moves whole snapshots in and out as
//! JSON for interoperability.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::error::{ReqError, Result};
use crate::models::{is_valid_type_code, Requirement, RequirementId, Snapshot, DB_VERSION};
use crate::numbering::validate_num_path;

use super::sqlite_backend::SqliteBackend;
use super::traits::RequirementStore;

const SQLITE_HEADER: &[u8] = b"SQLite format 3";

/// Extension used for saved and imported database files
pub const DATABASE_EXTENSION: &str = "ReqDB";

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Upgrades pre-1.1 layouts:
/// - a `settings` table is renamed to `db_version`
/// - a `requirements` table keyed by `type_code` is rebuilt keyed by `type_id`
///
/// Safe to run on a current or empty database; it does nothing there.
pub fn migrate_legacy_layout(conn: &Connection) -> Result<()> {
    if table_exists(conn, "settings")? && !table_exists(conn, "db_version")? {
        conn.execute_batch("ALTER TABLE settings RENAME TO db_version;")?;
        info!("Renamed legacy settings table to db_version");
    }

    if !table_exists(conn, "requirements")? || column_exists(conn, "requirements", "type_id")? {
        return Ok(());
    }
    if !column_exists(conn, "requirements", "type_code")? {
        return Err(ReqError::IncompatibleDatabase(
            "requirements table has neither type_id nor type_code".to_string(),
        ));
    }
    if !table_exists(conn, "types")? {
        return Err(ReqError::IncompatibleDatabase(
            "legacy requirements table without a types table".to_string(),
        ));
    }

    conn.execute_batch(
        "BEGIN;
         ALTER TABLE requirements RENAME TO requirements_old;
         CREATE TABLE requirements (
             id INTEGER PRIMARY KEY,
             type_id INTEGER NOT NULL,
             num_path TEXT NOT NULL,
             display_code TEXT,
             title TEXT NOT NULL,
             description_md TEXT NOT NULL,
             rationale_md TEXT,
             parent_id INTEGER,
             order_index INTEGER NOT NULL DEFAULT 0,
             status_id INTEGER NOT NULL,
             source TEXT,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL,
             FOREIGN KEY (parent_id) REFERENCES requirements(id) ON DELETE CASCADE,
             FOREIGN KEY (status_id) REFERENCES statuses(id),
             FOREIGN KEY (type_id) REFERENCES types(id)
         );
         INSERT INTO requirements
             (id, type_id, num_path, display_code, title, description_md, rationale_md,
              parent_id, order_index, status_id, source, created_at, updated_at)
         SELECT r.id, t.id, r.num_path, r.display_code, r.title, r.description_md,
                r.rationale_md, r.parent_id, r.order_index, r.status_id, r.source,
                r.created_at, r.updated_at
         FROM requirements_old r
         JOIN types t ON t.type_code = r.type_code;
         DROP TABLE requirements_old;
         COMMIT;",
    )?;
    info!("Migrated legacy requirements table to type_id keys");
    Ok(())
}

/// Checks that `path` is a SQLite file carrying the current `db_version`.
///
/// `name` is the user-facing file name when the file arrived from outside
/// (an upload or a picker); it must then end in `.reqdb`, case-insensitive.
pub fn validate_database_file(path: &Path, name: Option<&str>) -> Result<()> {
    if let Some(name) = name {
        if !has_database_extension(name) {
            return Err(ReqError::IncompatibleDatabase(format!(
                "only .{} files are supported, got '{}'",
                DATABASE_EXTENSION, name
            )));
        }
    }

    let mut header = [0u8; 15];
    let mut file = File::open(path)?;
    if file.read_exact(&mut header).is_err() || &header[..] != SQLITE_HEADER {
        return Err(ReqError::IncompatibleDatabase(format!(
            "{} is not a SQLite database",
            path.display()
        )));
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    if !table_exists(&conn, "db_version")? {
        return Err(ReqError::IncompatibleDatabase("missing db_version table".to_string()));
    }
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM db_version WHERE key = 'db_version'",
            [],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    match version.as_deref() {
        Some(DB_VERSION) => Ok(()),
        Some(other) => Err(ReqError::IncompatibleDatabase(format!(
            "db_version {} (expected {})",
            other, DB_VERSION
        ))),
        None => Err(ReqError::IncompatibleDatabase("db_version not set".to_string())),
    }
}

fn has_database_extension(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".reqdb")
}

/// Resolves the file a "save as" writes to: `.ReqDB` is appended unless
/// the target already carries the extension.
pub fn save_target(target: &Path) -> PathBuf {
    if has_database_extension(&target.to_string_lossy()) {
        target.to_path_buf()
    } else {
        let mut name = target.as_os_str().to_os_string();
        name.push(".");
        name.push(DATABASE_EXTENSION);
        PathBuf::from(name)
    }
}

/// Saves a copy of the working database and returns the path written
pub fn save_database_copy(backend: &SqliteBackend, target: &Path) -> Result<PathBuf> {
    let target = save_target(target);
    backend.save_copy(&target)?;
    Ok(target)
}

/// Replaces the working database with a validated import
pub fn import_database(backend: &SqliteBackend, source: &Path, name: Option<&str>) -> Result<()> {
    if let Err(e) = validate_database_file(source, name) {
        warn!("Rejected database import from {}: {}", source.display(), e);
        return Err(e);
    }
    backend.replace_with(source)
}

/// Writes a snapshot as pretty-printed JSON
pub fn export_to_json<P: AsRef<Path>>(snapshot: &Snapshot, json_path: P) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(json_path.as_ref(), json)?;
    Ok(())
}

/// Reads a snapshot from a JSON file
pub fn import_from_json<P: AsRef<Path>>(json_path: P) -> Result<Snapshot> {
    let content = std::fs::read_to_string(json_path.as_ref())?;
    Ok(serde_json::from_str(&content)?)
}

/// Checks a snapshot against the storage invariants and returns it with
/// requirements ordered parents first.
///
/// Rejects duplicate ids, invalid or repeated type codes, unknown type
/// and status references, malformed number paths, repeated
/// `(type_id, num_path)` pairs, dangling parents and parent cycles.
pub fn validate_snapshot(snapshot: &Snapshot) -> Result<Snapshot> {
    let mut type_ids = HashSet::new();
    let mut type_codes = HashSet::new();
    for ty in &snapshot.types {
        if !type_ids.insert(ty.id) {
            return Err(ReqError::InvalidSnapshot(format!("type id {} appears twice", ty.id)));
        }
        if !is_valid_type_code(&ty.type_code) {
            return Err(ReqError::InvalidTypeCode(ty.type_code.clone()));
        }
        if !type_codes.insert(ty.type_code.as_str()) {
            return Err(ReqError::DuplicateTypeCode(ty.type_code.clone()));
        }
    }

    let mut status_ids = HashSet::new();
    for status in &snapshot.statuses {
        if !status_ids.insert(status.id) {
            return Err(ReqError::InvalidSnapshot(format!(
                "status id {} appears twice",
                status.id
            )));
        }
    }

    let mut by_id: HashMap<RequirementId, &Requirement> = HashMap::new();
    let mut codes = HashSet::new();
    for req in &snapshot.requirements {
        if by_id.insert(req.id, req).is_some() {
            return Err(ReqError::InvalidSnapshot(format!(
                "requirement id {} appears twice",
                req.id
            )));
        }
        if !type_ids.contains(&req.type_id) {
            return Err(ReqError::TypeNotFound(req.type_id));
        }
        if !status_ids.contains(&req.status_id) {
            return Err(ReqError::StatusNotFound(req.status_id));
        }
        validate_num_path(&req.num_path)?;
        if !codes.insert((req.type_id, req.num_path.as_str())) {
            return Err(ReqError::DuplicateCode {
                type_id: req.type_id,
                num_path: req.num_path.clone(),
            });
        }
    }

    for req in &snapshot.requirements {
        let Some(parent_id) = req.parent_id else {
            continue;
        };
        if !by_id.contains_key(&parent_id) {
            return Err(ReqError::ParentNotFound(parent_id));
        }
        // Every parent exists, so a walk longer than the table is a loop.
        let mut current = Some(parent_id);
        let mut steps = 0;
        while let Some(id) = current {
            if id == req.id || steps > by_id.len() {
                return Err(ReqError::CycleDetected {
                    requirement: req.id,
                    new_parent: parent_id,
                });
            }
            steps += 1;
            current = by_id.get(&id).and_then(|r| r.parent_id);
        }
    }

    // Emit parents before their children.
    let mut placed: HashSet<RequirementId> = HashSet::new();
    let mut ordered = Vec::with_capacity(snapshot.requirements.len());
    let mut pending: Vec<&Requirement> = snapshot.requirements.iter().collect();
    while !pending.is_empty() {
        let (ready, deferred): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|r| r.parent_id.map_or(true, |p| placed.contains(&p)));
        if ready.is_empty() {
            let stuck = deferred[0];
            return Err(ReqError::CycleDetected {
                requirement: stuck.id,
                new_parent: stuck.parent_id.unwrap_or(stuck.id),
            });
        }
        for req in ready {
            placed.insert(req.id);
            ordered.push(req.clone());
        }
        pending = deferred;
    }

    Ok(Snapshot {
        types: snapshot.types.clone(),
        statuses: snapshot.statuses.clone(),
        requirements: ordered,
    })
}

/// Replaces the contents of a store with a snapshot.
///
/// The snapshot is validated in full before anything is written, and the
/// store applies it all at once; on any error the store keeps its previous
/// contents. Ids are kept as they appear in the snapshot. Returns the
/// number of requirements loaded.
pub fn load_snapshot(store: &dyn RequirementStore, snapshot: &Snapshot) -> Result<usize> {
    let ordered = match validate_snapshot(snapshot) {
        Ok(ordered) => ordered,
        Err(e) => {
            warn!("Rejected snapshot: {}", e);
            return Err(e);
        }
    };
    store.replace_contents(&ordered)?;
    debug!("Loaded snapshot with {} requirements", ordered.requirements.len());
    Ok(ordered.requirements.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryBackend;
    use crate::models::{RequirementChanges, RequirementInsert};
    use tempfile::TempDir;

    fn record(id: RequirementId, num_path: &str, parent_id: Option<RequirementId>) -> Requirement {
        RequirementInsert {
            type_id: 2,
            num_path: num_path.to_string(),
            display_code: None,
            title: format!("imported {}", num_path),
            description_md: String::new(),
            rationale_md: None,
            parent_id,
            order_index: 0,
            status_id: 1,
            source: None,
            created_at: chrono::Utc::now(),
        }
        .into_requirement(id)
    }

    fn snapshot_of(store: &dyn RequirementStore, requirements: Vec<Requirement>) -> Snapshot {
        Snapshot {
            requirements,
            ..store.snapshot().unwrap()
        }
    }

    fn store_with_precious(store: &dyn RequirementStore) {
        store
            .insert_requirement(&RequirementInsert {
                type_id: 1,
                num_path: "0".to_string(),
                display_code: None,
                title: "precious".to_string(),
                description_md: String::new(),
                rationale_md: None,
                parent_id: None,
                order_index: 0,
                status_id: 1,
                source: None,
                created_at: chrono::Utc::now(),
            })
            .unwrap();
    }

    fn assert_untouched(store: &dyn RequirementStore) {
        let reqs = store.list_requirements().unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].title, "precious");
        assert_eq!(store.list_types().unwrap().len(), 3);
    }

    fn legacy_database(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT);
             INSERT INTO settings (key, value) VALUES ('db_version', '1.1');
             CREATE TABLE statuses (id INTEGER PRIMARY KEY, name TEXT NOT NULL, color TEXT,
                                    order_index INTEGER NOT NULL DEFAULT 0);
             INSERT INTO statuses (id, name, order_index) VALUES (1, 'Draft', 0);
             CREATE TABLE types (id INTEGER PRIMARY KEY, type_code TEXT NOT NULL UNIQUE,
                                 name TEXT NOT NULL, color TEXT, icon TEXT,
                                 order_index INTEGER NOT NULL DEFAULT 0);
             INSERT INTO types (id, type_code, name, order_index) VALUES (7, 'SYS', 'System', 0);
             CREATE TABLE requirements (id INTEGER PRIMARY KEY, type_code TEXT NOT NULL,
                 num_path TEXT NOT NULL, display_code TEXT, title TEXT NOT NULL,
                 description_md TEXT NOT NULL, rationale_md TEXT, parent_id INTEGER,
                 order_index INTEGER NOT NULL DEFAULT 0, status_id INTEGER NOT NULL,
                 source TEXT, created_at TEXT NOT NULL, updated_at TEXT NOT NULL);
             INSERT INTO requirements (id, type_code, num_path, title, description_md,
                 parent_id, order_index, status_id, created_at, updated_at)
             VALUES (1, 'SYS', '0', 'Root', 'See SYS0.0', NULL, 0, 1,
                     '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z'),
                    (2, 'SYS', '0.0', 'Child', '', 1, 0, 1,
                     '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');",
        )
        .unwrap();
    }

    #[test]
    fn test_legacy_layout_is_migrated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.ReqDB");
        legacy_database(&path);

        let backend = SqliteBackend::new(&path).unwrap();
        let reqs = backend.list_requirements().unwrap();
        assert_eq!(reqs.len(), 2);
        assert!(reqs.iter().all(|r| r.type_id == 7));
        assert_eq!(reqs[1].parent_id, Some(1));
        assert_eq!(backend.get_meta("db_version").unwrap().as_deref(), Some("1.1"));
        // Existing types are kept; defaults are only seeded into empty tables.
        assert_eq!(backend.list_types().unwrap().len(), 1);
    }

    #[test]
    fn test_validate_rejects_non_sqlite_and_wrong_name() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("notes.ReqDB");
        std::fs::write(&text, "just some text, not a database").unwrap();
        assert!(matches!(
            validate_database_file(&text, None),
            Err(ReqError::IncompatibleDatabase(_))
        ));

        let good = dir.path().join("good.ReqDB");
        SqliteBackend::new(&good).unwrap();
        assert!(validate_database_file(&good, Some("good.reqdb")).is_ok());
        assert!(matches!(
            validate_database_file(&good, Some("good.sqlite")),
            Err(ReqError::IncompatibleDatabase(_))
        ));
    }

    #[test]
    fn test_validate_rejects_other_db_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.ReqDB");
        let backend = SqliteBackend::new(&path).unwrap();
        backend.set_meta("db_version", "1.0").unwrap();
        drop(backend);

        let err = validate_database_file(&path, None).unwrap_err();
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_save_target_appends_extension() {
        assert_eq!(save_target(Path::new("/tmp/specs")), PathBuf::from("/tmp/specs.ReqDB"));
        assert_eq!(save_target(Path::new("/tmp/a.db")), PathBuf::from("/tmp/a.db.ReqDB"));
        assert_eq!(save_target(Path::new("/tmp/b.REQDB")), PathBuf::from("/tmp/b.REQDB"));
    }

    #[test]
    fn test_import_rejection_leaves_working_database() {
        let dir = TempDir::new().unwrap();
        let backend = SqliteBackend::new(dir.path().join("work.db")).unwrap();
        backend
            .insert_requirement(&RequirementInsert {
                type_id: 1,
                num_path: "0".to_string(),
                display_code: None,
                title: "Keep me".to_string(),
                description_md: String::new(),
                rationale_md: None,
                parent_id: None,
                order_index: 0,
                status_id: 1,
                source: None,
                created_at: chrono::Utc::now(),
            })
            .unwrap();

        let bogus = dir.path().join("bogus.ReqDB");
        std::fs::write(&bogus, b"SQLite format 2 and then garbage").unwrap();
        assert!(import_database(&backend, &bogus, Some("bogus.ReqDB")).is_err());
        assert_eq!(backend.list_requirements().unwrap()[0].title, "Keep me");

        let saved = save_database_copy(&backend, &dir.path().join("copy")).unwrap();
        assert!(saved.to_string_lossy().ends_with("copy.ReqDB"));
        backend
            .update_requirement(1, &RequirementChanges { title: Some("Changed".into()), ..Default::default() })
            .unwrap();
        import_database(&backend, &saved, Some("copy.ReqDB")).unwrap();
        assert_eq!(backend.list_requirements().unwrap()[0].title, "Keep me");
    }

    #[test]
    fn test_json_snapshot_loads_into_fresh_store() {
        let dir = TempDir::new().unwrap();
        let source = SqliteBackend::in_memory().unwrap();
        let insert = |num_path: &str, parent_id| RequirementInsert {
            type_id: 2,
            num_path: num_path.to_string(),
            display_code: None,
            title: format!("F{}", num_path),
            description_md: String::new(),
            rationale_md: None,
            parent_id,
            order_index: 0,
            status_id: 3,
            source: Some("workshop".to_string()),
            created_at: chrono::Utc::now(),
        };
        let root = source.insert_requirement(&insert("0", None)).unwrap();
        source.insert_requirement(&insert("0.0", Some(root))).unwrap();

        let json_path = dir.path().join("snapshot.json");
        export_to_json(&source.snapshot().unwrap(), &json_path).unwrap();

        let target = MemoryBackend::new();
        let loaded = load_snapshot(&target, &import_from_json(&json_path).unwrap()).unwrap();
        assert_eq!(loaded, 2);

        let reqs = target.list_requirements().unwrap();
        let parent = reqs.iter().find(|r| r.num_path == "0").unwrap();
        let child = reqs.iter().find(|r| r.num_path == "0.0").unwrap();
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(child.source.as_deref(), Some("workshop"));
        let types = target.list_types().unwrap();
        assert_eq!(types.iter().find(|t| t.id == child.type_id).unwrap().type_code, "F");
    }

    #[test]
    fn test_rejected_snapshot_keeps_previous_contents() {
        let backends: Vec<Box<dyn RequirementStore>> =
            vec![Box::new(MemoryBackend::new()), Box::new(SqliteBackend::in_memory().unwrap())];
        for store in &backends {
            let store = store.as_ref();
            store_with_precious(store);

            let duplicate = snapshot_of(store, vec![record(1, "0", None), record(2, "0", None)]);
            assert!(load_snapshot(store, &duplicate).unwrap_err().is_duplicate_code());
            assert_untouched(store);
            // The store itself also refuses a bad batch as a whole.
            assert!(store.replace_contents(&duplicate).unwrap_err().is_duplicate_code());
            assert_untouched(store);

            let orphan = snapshot_of(store, vec![record(1, "0", None), record(2, "0.0", Some(9))]);
            assert!(matches!(
                load_snapshot(store, &orphan),
                Err(ReqError::ParentNotFound(9))
            ));
            assert_untouched(store);

            let cycle = snapshot_of(store, vec![record(1, "0", Some(2)), record(2, "1", Some(1))]);
            assert!(matches!(
                load_snapshot(store, &cycle),
                Err(ReqError::CycleDetected { .. })
            ));
            assert_untouched(store);

            let mut unknown_status = record(1, "0", None);
            unknown_status.status_id = 99;
            let bad_status = snapshot_of(store, vec![unknown_status]);
            assert!(matches!(
                load_snapshot(store, &bad_status),
                Err(ReqError::StatusNotFound(99))
            ));
            assert_untouched(store);
        }
    }

    #[test]
    fn test_validate_snapshot_orders_parents_first() {
        let store = MemoryBackend::new();
        let snapshot = snapshot_of(
            &store,
            vec![record(3, "0.0.0", Some(2)), record(2, "0.0", Some(1)), record(1, "0", None)],
        );
        let ordered = validate_snapshot(&snapshot).unwrap();
        let ids: Vec<_> = ordered.requirements.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let sqlite = SqliteBackend::in_memory().unwrap();
        assert_eq!(load_snapshot(&sqlite, &snapshot).unwrap(), 3);
        assert_eq!(sqlite.get_requirement(3).unwrap().unwrap().parent_id, Some(2));
    }

    #[test]
    fn test_validate_snapshot_rejects_bad_type_table() {
        let store = MemoryBackend::new();
        let mut snapshot = store.snapshot().unwrap();
        snapshot.types[1].type_code = "CORE".to_string();
        assert!(matches!(
            validate_snapshot(&snapshot),
            Err(ReqError::DuplicateTypeCode(code)) if code == "CORE"
        ));

        let mut snapshot = store.snapshot().unwrap();
        snapshot.requirements = vec![record(1, "0.x", None)];
        assert!(matches!(validate_snapshot(&snapshot), Err(ReqError::InvalidNumPath(_))));
    }
}
