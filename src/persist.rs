// used for persistence
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;
use tracing::info;

use crate::error::{AutobindError, Result};
use crate::store::{check_key, check_length, join, lineage, split, ValueStore};

/// Where a [`SqliteStore`] keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

// ------------- Persistence -------------
pub struct SqliteStore {
    db: Mutex<Connection>,
    max_value_length: usize,
}

impl SqliteStore {
    pub fn open(mode: PersistenceMode, max_value_length: usize) -> Result<Self> {
        let connection = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        // The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
        // debugging using an external tool like DBeaver impossible
        connection.execute_batch(
            "
            create table if not exists PreferenceNode (
                Node_Path text not null,
                Parent_Path text null,
                constraint referenceable_Node_Path primary key (
                    Node_Path
                )
            );-- STRICT;
            create table if not exists PreferenceEntry (
                Node_Path text not null,
                Entry_Key text not null,
                Entry_Value text not null,
                constraint Entry_in_Node foreign key (
                    Node_Path
                ) references PreferenceNode(Node_Path),
                constraint unique_Entry primary key (
                    Node_Path,
                    Entry_Key
                )
            );-- STRICT;
            insert or ignore into PreferenceNode (Node_Path, Parent_Path) values ('/', null);
            ",
        )?;
        info!(mode = ?mode, "preference store opened");
        Ok(Self {
            db: Mutex::new(connection),
            max_value_length,
        })
    }

    fn has_node(db: &Connection, node: &str) -> Result<bool> {
        let found: Option<i64> = db
            .query_row(
                "select 1 from PreferenceNode where Node_Path = ?",
                params![node],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn has_entry(db: &Connection, node: &str, key: &str) -> Result<bool> {
        let found: Option<i64> = db
            .query_row(
                "select 1 from PreferenceEntry where Node_Path = ? and Entry_Key = ?",
                params![node, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn ensure(db: &Connection, node: &str) -> Result<()> {
        for path in lineage(node) {
            if Self::has_node(db, &path)? {
                continue;
            }
            let (parent, name) = split(&path).unwrap_or(("/", path.as_str()));
            if Self::has_entry(db, parent, name)? {
                return Err(AutobindError::Namespace(name.to_string()));
            }
            db.execute(
                "insert into PreferenceNode (Node_Path, Parent_Path) values (?, ?)",
                params![path, parent],
            )?;
        }
        Ok(())
    }
}

impl ValueStore for SqliteStore {
    fn get(&self, node: &str, key: &str) -> Result<Option<String>> {
        let db = self.db.lock()?;
        let value = db
            .query_row(
                "select Entry_Value from PreferenceEntry where Node_Path = ? and Entry_Key = ?",
                params![node, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
    fn put(&self, node: &str, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        check_length(value, self.max_value_length)?;
        let db = self.db.lock()?;
        Self::ensure(&db, node)?;
        if Self::has_node(&db, &join(node, key))? {
            return Err(AutobindError::Namespace(key.to_string()));
        }
        db.execute(
            "
            insert into PreferenceEntry (Node_Path, Entry_Key, Entry_Value) values (?, ?, ?)
            on conflict (Node_Path, Entry_Key) do update set Entry_Value = excluded.Entry_Value
            ",
            params![node, key, value],
        )?;
        Ok(())
    }
    fn remove(&self, node: &str, key: &str) -> Result<()> {
        let db = self.db.lock()?;
        db.execute(
            "delete from PreferenceEntry where Node_Path = ? and Entry_Key = ?",
            params![node, key],
        )?;
        Ok(())
    }
    fn keys(&self, node: &str) -> Result<Vec<String>> {
        let db = self.db.lock()?;
        let mut statement =
            db.prepare("select Entry_Key from PreferenceEntry where Node_Path = ? order by Entry_Key")?;
        let keys = statement
            .query_map(params![node], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
    fn children(&self, node: &str) -> Result<Vec<String>> {
        let db = self.db.lock()?;
        let mut statement =
            db.prepare("select Node_Path from PreferenceNode where Parent_Path = ? order by Node_Path")?;
        let paths = statement
            .query_map(params![node], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(paths
            .iter()
            .filter_map(|path| split(path).map(|(_, name)| name.to_string()))
            .collect())
    }
    fn node_exists(&self, node: &str) -> Result<bool> {
        let db = self.db.lock()?;
        Self::has_node(&db, node)
    }
    fn create_node(&self, node: &str) -> Result<()> {
        let db = self.db.lock()?;
        Self::ensure(&db, node)
    }
    fn remove_node(&self, node: &str) -> Result<()> {
        if node == "/" {
            return Err(AutobindError::Store("the root node cannot be removed".into()));
        }
        let mut db = self.db.lock()?;
        let tx = db.transaction()?;
        // substr instead of like, since '_' and '%' are valid in names
        tx.execute(
            "
            delete from PreferenceEntry
            where Node_Path = ?1 or substr(Node_Path, 1, length(?1) + 1) = ?1 || '/'
            ",
            params![node],
        )?;
        tx.execute(
            "
            delete from PreferenceNode
            where Node_Path = ?1 or substr(Node_Path, 1, length(?1) + 1) = ?1 || '/'
            ",
            params![node],
        )?;
        tx.commit()?;
        Ok(())
    }
    fn flush(&self) -> Result<()> {
        let db = self.db.lock()?;
        db.cache_flush()?;
        Ok(())
    }
    fn max_value_length(&self) -> usize {
        self.max_value_length
    }
}
