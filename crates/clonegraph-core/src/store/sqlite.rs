//! SQLite-backed [`Store`].
//!
//! Records are rows of the shared `records` table with their fields encoded
//! as JSON. A reference field is stored as `{"$ref": {"model": .., "id": ..}}`
//! and decoded back into the handle of the referenced row.
//!
//! The store keeps an identity cache: a row is materialised at most once per
//! store, and later loads return the same [`RecordRef`]. Cycles are safe
//! because a handle is cached before its fields are decoded.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Map, Value as Json};
use tracing::{debug, warn};

use crate::errors::{CloneError, CloneResult};
use crate::models::{FieldAccess, Record, RecordRef, Value};
use crate::reflect::{RelationDescriptor, RelationKind};
use crate::store::{link_key, schema, Store};

const REF_KEY: &str = "$ref";

// ---------------------------------------------------------------------------
// Helper: tilde expansion (equivalent to Path.expanduser())
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

/// JSON path of a top-level field.
fn field_path(field: &str) -> String {
    format!("$.\"{field}\"")
}

/// JSON path of the referenced id inside a reference field.
fn ref_id_path(field: &str) -> String {
    format!("$.\"{field}\".\"{REF_KEY}\".id")
}

// ---------------------------------------------------------------------------
// Helper: field encoding
// ---------------------------------------------------------------------------

fn encode_value(field: &str, value: &Value) -> CloneResult<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Text(s) => Json::String(s.clone()),
        Value::Ref(target) => {
            let target = target.borrow();
            let id = target.pk().ok_or_else(|| {
                CloneError::persistence(format!(
                    "field '{field}' points at an unsaved {}",
                    target.model()
                ))
            })?;
            let mut pointer = Map::new();
            pointer.insert("model".to_string(), Json::String(target.model().to_string()));
            pointer.insert("id".to_string(), json!(id));
            let mut wrapper = Map::new();
            wrapper.insert(REF_KEY.to_string(), Json::Object(pointer));
            Json::Object(wrapper)
        }
    })
}

fn encode_fields(record: &Record) -> CloneResult<String> {
    let mut map = Map::new();
    for (name, value) in record.fields() {
        map.insert(name.to_string(), encode_value(name, value)?);
    }
    Ok(Json::Object(map).to_string())
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Row ids written inside one open transaction.
#[derive(Default)]
struct OpenTx {
    inserted: Vec<i64>,
    updated: Vec<i64>,
}

/// SQLite record store with a per-store identity cache.
pub struct SqliteStore {
    conn: Connection,
    db_path: Option<PathBuf>,
    cache: RefCell<HashMap<i64, RecordRef>>,
    /// Open transactions, innermost last.
    open: Vec<OpenTx>,
}

impl SqliteStore {
    /// Open (or create) a database file. The path is tilde-expanded, made
    /// absolute, and its parent directories are created.
    pub fn open(db_path: impl AsRef<Path>) -> CloneResult<Self> {
        let expanded = expand_tilde(&db_path.as_ref().to_string_lossy());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&resolved)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::from_connection(conn, Some(resolved))
    }

    pub fn open_in_memory() -> CloneResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>) -> CloneResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            db_path,
            cache: RefCell::new(HashMap::new()),
            open: Vec::new(),
        })
    }

    /// Resolved database path, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Persist a new record and return its handle.
    pub fn insert(&mut self, record: Record) -> CloneResult<RecordRef> {
        let handle = RecordRef::new(record.detached());
        self.save(&handle)?;
        Ok(handle)
    }

    /// Handle of the row with `id`, loading it on first use.
    pub fn load(&self, id: i64) -> CloneResult<Option<RecordRef>> {
        if let Some(hit) = self.cache.borrow().get(&id) {
            return Ok(Some(hit.clone()));
        }
        let Some((model, fields_json)) = self.row(id)? else {
            return Ok(None);
        };

        let mut shell = Record::new(model);
        shell.set_pk(Some(id));
        let handle = RecordRef::new(shell);
        self.cache.borrow_mut().insert(id, handle.clone());
        self.fill(&handle, id, &fields_json)?;
        Ok(Some(handle))
    }

    fn row(&self, id: i64) -> CloneResult<Option<(String, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT model, fields_json FROM records WHERE id = ?1;",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Decode `fields_json` into `handle`, which must already be cached.
    fn fill(&self, handle: &RecordRef, id: i64, fields_json: &str) -> CloneResult<()> {
        let decoded: Json = serde_json::from_str(fields_json)?;
        let Json::Object(map) = decoded else {
            return Err(CloneError::persistence(format!(
                "row {id} does not hold a JSON object"
            )));
        };
        for (name, raw) in map {
            let value = self.decode_value(&name, raw)?;
            handle.borrow_mut().set(&name, value);
        }
        Ok(())
    }

    /// Reset a cached handle to the row as currently stored.
    fn refresh(&self, id: i64) -> CloneResult<()> {
        let Some(handle) = self.cache.borrow().get(&id).cloned() else {
            return Ok(());
        };
        let Some((model, fields_json)) = self.row(id)? else {
            return Ok(());
        };
        let mut shell = Record::new(model);
        shell.set_pk(Some(id));
        *handle.borrow_mut() = shell;
        self.fill(&handle, id, &fields_json)
    }

    /// Every record of `model`, in insertion order.
    pub fn all(&self, model: &str) -> CloneResult<Vec<RecordRef>> {
        let ids = self.ids(
            "SELECT id FROM records WHERE model = ?1 ORDER BY id;",
            params![model],
        )?;
        self.load_all(ids)
    }

    fn decode_value(&self, field: &str, raw: Json) -> CloneResult<Value> {
        Ok(match raw {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::Text(s),
            Json::Object(obj) => {
                let id = obj
                    .get(REF_KEY)
                    .and_then(|r| r.get("id"))
                    .and_then(Json::as_i64)
                    .ok_or_else(|| {
                        CloneError::persistence(format!("field '{field}' holds an unknown object"))
                    })?;
                let target = self.load(id)?.ok_or_else(|| {
                    CloneError::persistence(format!("field '{field}' points at missing row {id}"))
                })?;
                Value::Ref(target)
            }
            Json::Array(_) => {
                return Err(CloneError::persistence(format!(
                    "field '{field}' holds an array"
                )))
            }
        })
    }

    fn ids(&self, sql: &str, params: impl rusqlite::Params) -> CloneResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map(params, |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn load_all(&self, ids: Vec<i64>) -> CloneResult<Vec<RecordRef>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(id)? {
                Some(handle) => out.push(handle),
                None => warn!(id, "row vanished while loading"),
            }
        }
        Ok(out)
    }

    fn pointing_at(
        &self,
        model: &str,
        field: &str,
        record: &RecordRef,
        limit: i64,
    ) -> CloneResult<Vec<RecordRef>> {
        let Some(pk) = record.pk() else {
            return Ok(Vec::new());
        };
        let ids = self.ids(
            "SELECT id FROM records \
             WHERE model = ?1 AND json_extract(fields_json, ?2) = ?3 \
             ORDER BY id LIMIT ?4;",
            params![model, ref_id_path(field), pk, limit],
        )?;
        self.load_all(ids)
    }
}

impl Store for SqliteStore {
    fn exists(&self, model: &str, field: &str, value: &Value) -> CloneResult<bool> {
        let base = "SELECT 1 FROM records WHERE model = ?1 AND json_extract(fields_json, ?2)";
        let found = match value {
            Value::Null => self
                .conn
                .query_row(
                    &format!("{base} IS NULL LIMIT 1;"),
                    params![model, field_path(field)],
                    |_| Ok(()),
                )
                .optional()?,
            Value::Bool(b) => self
                .conn
                .query_row(
                    &format!("{base} = ?3 LIMIT 1;"),
                    params![model, field_path(field), *b as i64],
                    |_| Ok(()),
                )
                .optional()?,
            Value::Int(i) => self
                .conn
                .query_row(
                    &format!("{base} = ?3 LIMIT 1;"),
                    params![model, field_path(field), i],
                    |_| Ok(()),
                )
                .optional()?,
            Value::Float(f) => self
                .conn
                .query_row(
                    &format!("{base} = ?3 LIMIT 1;"),
                    params![model, field_path(field), f],
                    |_| Ok(()),
                )
                .optional()?,
            Value::Text(s) => self
                .conn
                .query_row(
                    &format!("{base} = ?3 LIMIT 1;"),
                    params![model, field_path(field), s],
                    |_| Ok(()),
                )
                .optional()?,
            Value::Ref(target) => match target.pk() {
                None => None,
                Some(pk) => self
                    .conn
                    .query_row(
                        &format!("{base} = ?3 LIMIT 1;"),
                        params![model, ref_id_path(field), pk],
                        |_| Ok(()),
                    )
                    .optional()?,
            },
        };
        Ok(found.is_some())
    }

    fn save(&mut self, record: &RecordRef) -> CloneResult<()> {
        let (model, pk, fields_json) = {
            let rec = record.borrow();
            (rec.model().to_string(), rec.pk(), encode_fields(&rec)?)
        };
        match pk {
            None => {
                self.conn.execute(
                    "INSERT INTO records(model, fields_json) VALUES (?1, ?2);",
                    params![model, fields_json],
                )?;
                let id = self.conn.last_insert_rowid();
                record.borrow_mut().set_pk(Some(id));
                self.cache.borrow_mut().insert(id, record.clone());
                if let Some(open) = self.open.last_mut() {
                    open.inserted.push(id);
                }
                debug!(id, model = %model, "sqlite store inserted record");
            }
            Some(id) => {
                let changed = self.conn.execute(
                    "UPDATE records SET fields_json = ?1, updated_at = CURRENT_TIMESTAMP \
                     WHERE id = ?2 AND model = ?3;",
                    params![fields_json, id, model],
                )?;
                if changed == 0 {
                    return Err(CloneError::persistence(format!(
                        "{model}#{id} is not stored here"
                    )));
                }
                if let Some(open) = self.open.last_mut() {
                    if !open.updated.contains(&id) {
                        open.updated.push(id);
                    }
                }
            }
        }
        Ok(())
    }

    fn related(
        &self,
        record: &RecordRef,
        relation: &RelationDescriptor,
    ) -> CloneResult<Vec<RecordRef>> {
        let reverse = relation.reverse().unwrap_or_default();
        match relation.kind {
            RelationKind::ManyToOne => Ok(record.target(&relation.name).into_iter().collect()),
            RelationKind::OneToOne if record.has(&relation.name) => {
                Ok(record.target(&relation.name).into_iter().collect())
            }
            RelationKind::OneToOne => self.pointing_at(&relation.target, reverse, record, 1),
            RelationKind::OneToMany => self.pointing_at(&relation.target, reverse, record, -1),
            RelationKind::ManyToMany => {
                let Some(pk) = record.pk() else {
                    return Ok(Vec::new());
                };
                let (key, is_left) = link_key(&record.model(), relation);
                let sql = if is_left {
                    "SELECT right_id FROM record_links WHERE link_key = ?1 AND left_id = ?2 ORDER BY id;"
                } else {
                    "SELECT left_id FROM record_links WHERE link_key = ?1 AND right_id = ?2 ORDER BY id;"
                };
                let ids = self.ids(sql, params![key, pk])?;
                self.load_all(ids)
            }
        }
    }

    fn associate(
        &mut self,
        record: &RecordRef,
        relation: &RelationDescriptor,
        targets: &[RecordRef],
    ) -> CloneResult<()> {
        let pk = record.pk().ok_or_else(|| {
            CloneError::persistence(format!(
                "cannot associate unsaved {} through '{}'",
                record.model(),
                relation.name
            ))
        })?;
        let (key, is_left) = link_key(&record.model(), relation);
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO record_links(link_key, left_id, right_id) VALUES (?1, ?2, ?3);",
        )?;
        for target in targets {
            let other = target.pk().ok_or_else(|| {
                CloneError::persistence(format!(
                    "cannot associate with unsaved {}",
                    target.model()
                ))
            })?;
            let (left, right) = if is_left { (pk, other) } else { (other, pk) };
            stmt.execute(params![key, left, right])?;
        }
        Ok(())
    }

    fn count(&self, model: &str) -> CloneResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE model = ?1;",
            params![model],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn begin(&mut self) -> CloneResult<()> {
        self.conn.execute_batch("SAVEPOINT clonegraph_op;")?;
        self.open.push(OpenTx::default());
        Ok(())
    }

    fn commit(&mut self) -> CloneResult<()> {
        let done = self
            .open
            .pop()
            .ok_or_else(|| CloneError::persistence("commit without an open transaction"))?;
        self.conn.execute_batch("RELEASE SAVEPOINT clonegraph_op;")?;
        if let Some(parent) = self.open.last_mut() {
            parent.inserted.extend(done.inserted);
            for id in done.updated {
                if !parent.updated.contains(&id) {
                    parent.updated.push(id);
                }
            }
        }
        Ok(())
    }

    /// Roll back the innermost transaction. Rows inserted inside it are
    /// evicted from the cache and their handles lose their `pk`; handles of
    /// updated rows are reloaded from the restored rows.
    fn rollback(&mut self) -> CloneResult<()> {
        let tx = self
            .open
            .pop()
            .ok_or_else(|| CloneError::persistence("rollback without an open transaction"))?;
        self.conn
            .execute_batch("ROLLBACK TO SAVEPOINT clonegraph_op; RELEASE SAVEPOINT clonegraph_op;")?;
        {
            let mut cache = self.cache.borrow_mut();
            for id in &tx.inserted {
                if let Some(handle) = cache.remove(id) {
                    handle.borrow_mut().set_pk(None);
                }
            }
        }
        for id in tx.updated.iter().filter(|id| !tx.inserted.contains(id)) {
            self.refresh(*id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (SqliteStore, RecordRef, RecordRef) {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let artist = store
            .insert(Record::new("Artist").with("name", "Les").with("active", true))
            .unwrap();
        let album = store
            .insert(
                Record::new("Album")
                    .with("title", "Frizzle Fry")
                    .with("year", 1990)
                    .with("rating", 4.5)
                    .with("artist", &artist),
            )
            .unwrap();
        (store, artist, album)
    }

    #[test]
    fn values_round_trip_through_a_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            let artist = store.insert(Record::new("Artist").with("name", "Les")).unwrap();
            store
                .insert(
                    Record::new("Album")
                        .with("title", "Sailing")
                        .with("year", 1991)
                        .with("rating", 4.5)
                        .with("notes", Value::Null)
                        .with("artist", &artist),
                )
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.db_path(), Some(path.as_path()));
        let albums = store.all("Album").unwrap();
        assert_eq!(albums.len(), 1);
        let album = &albums[0];
        assert_eq!(album.get("title"), Some(Value::from("Sailing")));
        assert_eq!(album.get("year"), Some(Value::Int(1991)));
        assert_eq!(album.get("rating"), Some(Value::Float(4.5)));
        assert_eq!(album.get("notes"), Some(Value::Null));
        let artist = album.target("artist").unwrap();
        assert_eq!(artist.get("name"), Some(Value::from("Les")));
    }

    #[test]
    fn loads_share_one_handle_per_row() {
        let (store, artist, album) = seeded();
        let again = store.load(artist.pk().unwrap()).unwrap().unwrap();
        assert!(again.ptr_eq(&artist));
        let rel = RelationDescriptor::one_to_many("album_set", "Album", "artist");
        let children = store.related(&artist, &rel).unwrap();
        assert_eq!(children, vec![album]);
    }

    #[test]
    fn exists_matches_each_value_type() {
        let (store, artist, _) = seeded();
        assert!(store.exists("Artist", "name", &Value::from("Les")).unwrap());
        assert!(!store.exists("Artist", "name", &Value::from("Tim")).unwrap());
        assert!(store.exists("Artist", "active", &Value::Bool(true)).unwrap());
        assert!(store.exists("Album", "year", &Value::Int(1990)).unwrap());
        assert!(store.exists("Album", "rating", &Value::Float(4.5)).unwrap());
        assert!(store.exists("Album", "artist", &Value::Ref(artist)).unwrap());
        assert!(store.exists("Album", "missing", &Value::Null).unwrap());
        assert!(!store.exists("Album", "title", &Value::Null).unwrap());
    }

    #[test]
    fn saving_a_reference_to_an_unsaved_record_fails() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let ghost = RecordRef::new(Record::new("Artist"));
        let album = RecordRef::new(Record::new("Album").with("artist", &ghost));
        assert!(matches!(store.save(&album), Err(CloneError::Persistence(_))));
        assert_eq!(store.count("Album").unwrap(), 0);
    }

    #[test]
    fn links_and_updates() {
        let (mut store, artist, album) = seeded();
        let group = store.insert(Record::new("Group").with("name", "Primus")).unwrap();
        let members = RelationDescriptor::many_to_many("members", "Artist", "group_set");
        store.associate(&group, &members, &[artist.clone()]).unwrap();
        store.associate(&group, &members, &[artist.clone()]).unwrap();

        let groups = RelationDescriptor::many_to_many("group_set", "Group", "members");
        assert_eq!(store.related(&artist, &groups).unwrap(), vec![group.clone()]);
        assert_eq!(store.related(&group, &members).unwrap(), vec![artist]);

        album.set("title", "Sailing the Seas of Cheese");
        store.save(&album).unwrap();
        assert!(store
            .exists("Album", "title", &Value::from("Sailing the Seas of Cheese"))
            .unwrap());
    }

    #[test]
    fn rollback_reloads_updated_handles() {
        let (mut store, artist, album) = seeded();
        store.begin().unwrap();
        album.set("title", "Sailing the Seas of Cheese");
        album.set("artist", Value::Null);
        store.save(&album).unwrap();
        store.rollback().unwrap();

        assert_eq!(album.get("title"), Some(Value::from("Frizzle Fry")));
        assert!(album.target("artist").unwrap().ptr_eq(&artist));
        assert!(store.load(album.pk().unwrap()).unwrap().unwrap().ptr_eq(&album));
    }

    #[test]
    fn rollback_discards_inserted_rows() {
        let (mut store, _, _) = seeded();
        store.begin().unwrap();
        let temp = store.insert(Record::new("Artist").with("name", "Tim")).unwrap();
        assert_eq!(store.count("Artist").unwrap(), 2);
        store.rollback().unwrap();
        assert_eq!(store.count("Artist").unwrap(), 1);
        assert_eq!(temp.pk(), None);

        store.begin().unwrap();
        store.insert(Record::new("Artist").with("name", "Larry")).unwrap();
        store.commit().unwrap();
        assert_eq!(store.count("Artist").unwrap(), 2);
        assert!(store.rollback().is_err());
    }
}
