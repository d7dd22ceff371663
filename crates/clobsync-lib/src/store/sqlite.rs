use log::{debug, info};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{KeyValue, NewRow, RemoteFileRecord, RowKey, RowStore, RowStoreError};
use crate::mapping::{Column, Datatype, Purpose, TableMapping};

/// SQLite implementation of the row store
pub struct SqliteRowStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteRowStore {
    /// Open (or create) the database file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RowStoreError> {
        let conn = Connection::open(path.as_ref())?;
        info!("Opened row store at {}", path.as_ref().display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, RowStoreError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        })
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bound the time a statement waits on a locked database
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), RowStoreError> {
        self.lock().busy_timeout(timeout)?;
        Ok(())
    }

    /// Attach another database file under `schema` so qualified table names resolve
    pub fn attach_schema(&self, schema: &str, path: &Path) -> Result<(), RowStoreError> {
        let sql = format!("ATTACH DATABASE ?1 AS {}", quote(schema));
        self.lock()
            .execute(&sql, [path.to_string_lossy().as_ref()])?;
        Ok(())
    }

    /// Create the tables backing a mapping if they do not exist yet
    pub fn create_tables(&self, table: &TableMapping) -> Result<(), RowStoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        if let Some(parent) = &table.parent {
            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY, {} TEXT NOT NULL)",
                    qualified(&parent.schema, &parent.table),
                    quote(&parent.key_column),
                    quote(&parent.mnemonic_column)
                ),
                [],
            )?;
        }

        let mut defs: Vec<String> = table.columns.iter().map(column_definition).collect();
        if let Some(parent) = &table.parent {
            if table
                .columns
                .iter()
                .all(|c| c.name != parent.foreign_key_column)
            {
                defs.push(format!("{} INTEGER", quote(&parent.foreign_key_column)));
            }
        }

        tx.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                qualified(&table.schema, &table.table),
                defs.join(", ")
            ),
            [],
        )?;
        tx.commit()?;

        debug!("Created tables for {}", table.qualified_name());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RowStore for SqliteRowStore {
    fn read_payload(&self, table: &TableMapping, key: &RowKey) -> Result<Vec<u8>, RowStoreError> {
        let content = table
            .column(Purpose::Content)
            .ok_or_else(|| RowStoreError::Unsupported(format!("{} has no content column", table.qualified_name())))?;
        let (filter, params) = key_filter(key, 1);
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            quote(&content.name),
            qualified(&table.schema, &table.table),
            filter
        );

        let conn = self.lock();
        let payload = conn
            .query_row(&sql, params_from_iter(params.iter()), |row| {
                Ok(match row.get_ref(0)? {
                    ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes.to_vec(),
                    ValueRef::Null => Vec::new(),
                    ValueRef::Integer(i) => i.to_string().into_bytes(),
                    ValueRef::Real(r) => r.to_string().into_bytes(),
                })
            })
            .optional()?;

        payload.ok_or_else(|| RowStoreError::RowNotFound(format!("{} {}", table.qualified_name(), key)))
    }

    fn write_payload(
        &self,
        table: &TableMapping,
        key: &RowKey,
        content: &[u8],
        mime_type: Option<&str>,
    ) -> Result<(), RowStoreError> {
        let content_column = table
            .column(Purpose::Content)
            .ok_or_else(|| RowStoreError::Unsupported(format!("{} has no content column", table.qualified_name())))?;

        let mut assignments = vec![format!("{} = ?1", quote(&content_column.name))];
        let mut params = vec![content_value(table, content_column, content)?];

        if let (Some(mime), Some(mime_column)) = (mime_type, table.mime_column()) {
            params.push(Value::Text(mime.to_string()));
            assignments.push(format!("{} = ?{}", quote(&mime_column.name), params.len()));
        }

        let (filter, key_params) = key_filter(key, params.len() + 1);
        params.extend(key_params);

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            qualified(&table.schema, &table.table),
            assignments.join(", "),
            filter
        );

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(&sql, params_from_iter(params.iter()))?;
        if changed == 0 {
            return Err(RowStoreError::RowNotFound(format!(
                "{} {}",
                table.qualified_name(),
                key
            )));
        }
        tx.commit()?;

        debug!(
            "Wrote {} bytes to {} {}",
            content.len(),
            table.qualified_name(),
            key
        );
        Ok(())
    }

    fn insert_row(&self, table: &TableMapping, row: &NewRow) -> Result<RowKey, RowStoreError> {
        let identifier = table
            .column(Purpose::Identifier)
            .ok_or_else(|| RowStoreError::Unsupported(format!("{} has no identifier column", table.qualified_name())))?;
        if identifier.datatype != Datatype::Integer {
            return Err(RowStoreError::Unsupported(format!(
                "{}: only integer identifiers can be generated",
                table.qualified_name()
            )));
        }
        let content_column = table
            .column(Purpose::Content)
            .ok_or_else(|| RowStoreError::Unsupported(format!("{} has no content column", table.qualified_name())))?;

        let target = qualified(&table.schema, &table.table);
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let mut columns = vec![quote(&content_column.name)];
        let mut values = vec!["?1".to_string()];
        let mut params = vec![content_value(table, content_column, &row.content)?];

        if let Some(parent) = &table.parent {
            tx.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES (?1)",
                    qualified(&parent.schema, &parent.table),
                    quote(&parent.mnemonic_column)
                ),
                [row.mnemonic.as_str()],
            )?;
            params.push(Value::Integer(tx.last_insert_rowid()));
            columns.push(quote(&parent.foreign_key_column));
            values.push(format!("?{}", params.len()));
        } else if let Some(mnemonic) = table.column(Purpose::Mnemonic) {
            params.push(Value::Text(row.mnemonic.clone()));
            columns.push(quote(&mnemonic.name));
            values.push(format!("?{}", params.len()));
        }

        if let (Some(mime), Some(mime_column)) = (&row.mime_type, table.mime_column()) {
            params.push(Value::Text(mime.clone()));
            columns.push(quote(&mime_column.name));
            values.push(format!("?{}", params.len()));
        }

        for seq in table
            .columns
            .iter()
            .filter(|c| c.purpose == Purpose::SequenceSource)
        {
            columns.push(quote(&seq.name));
            values.push(format!(
                "(SELECT COALESCE(MAX({}), 0) + 1 FROM {})",
                quote(&seq.name),
                target
            ));
        }

        tx.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                target,
                columns.join(", "),
                values.join(", ")
            ),
            params_from_iter(params.iter()),
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        info!("Inserted {} into {} as {}={}", row.mnemonic, table.qualified_name(), identifier.name, id);
        Ok(RowKey::single(identifier.name.clone(), KeyValue::Integer(id)))
    }

    fn list_known_files(&self, table: &TableMapping) -> Result<Vec<RemoteFileRecord>, RowStoreError> {
        let identifier = table
            .column(Purpose::Identifier)
            .ok_or_else(|| RowStoreError::Unsupported(format!("{} has no identifier column", table.qualified_name())))?;

        let sql = match (&table.parent, table.column(Purpose::Mnemonic)) {
            (Some(parent), _) => format!(
                "SELECT c.{}, p.{} FROM {} c JOIN {} p ON c.{} = p.{}",
                quote(&identifier.name),
                quote(&parent.mnemonic_column),
                qualified(&table.schema, &table.table),
                qualified(&parent.schema, &parent.table),
                quote(&parent.foreign_key_column),
                quote(&parent.key_column)
            ),
            (None, Some(mnemonic)) => format!(
                "SELECT {}, {} FROM {}",
                quote(&identifier.name),
                quote(&mnemonic.name),
                qualified(&table.schema, &table.table)
            ),
            (None, None) => {
                return Err(RowStoreError::Unsupported(format!(
                    "{} has no mnemonic column",
                    table.qualified_name()
                )))
            }
        };

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let key = match row.get_ref(0)? {
                ValueRef::Integer(i) => Some(KeyValue::Integer(i)),
                ValueRef::Text(t) => Some(KeyValue::Text(String::from_utf8_lossy(t).into_owned())),
                _ => None,
            };
            let mnemonic: Option<String> = row.get(1)?;
            Ok((key, mnemonic))
        })?;

        let qualified_name = table.qualified_name();
        let mut records = Vec::new();
        for row in rows {
            match row? {
                (Some(key), Some(mnemonic)) => records.push(RemoteFileRecord::new(
                    qualified_name.clone(),
                    RowKey::single(identifier.name.clone(), key),
                    table.file_name_for(&mnemonic),
                )),
                _ => debug!("Skipping row without key or mnemonic in {}", qualified_name),
            }
        }

        debug!("Listed {} file(s) in {}", records.len(), qualified_name);
        Ok(records)
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn qualified(schema: &str, table: &str) -> String {
    if schema.is_empty() || schema.eq_ignore_ascii_case("main") {
        quote(table)
    } else {
        format!("{}.{}", quote(schema), quote(table))
    }
}

fn column_definition(column: &Column) -> String {
    let ty = match (column.purpose, column.datatype) {
        (Purpose::Identifier, Datatype::Integer) => "INTEGER PRIMARY KEY",
        (_, Datatype::Text) | (_, Datatype::Varchar) => "TEXT",
        (_, Datatype::Binary) => "BLOB",
        (_, Datatype::Integer) => "INTEGER",
    };
    format!("{} {}", quote(&column.name), ty)
}

/// `"A" = ?n AND "B" = ?n+1 ...` with parameters starting at `first`
fn key_filter(key: &RowKey, first: usize) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for (i, (column, value)) in key.parts().iter().enumerate() {
        clauses.push(format!("{} = ?{}", quote(column), first + i));
        params.push(match value {
            KeyValue::Integer(v) => Value::Integer(*v),
            KeyValue::Text(v) => Value::Text(v.clone()),
        });
    }
    (clauses.join(" AND "), params)
}

fn content_value(table: &TableMapping, column: &Column, content: &[u8]) -> Result<Value, RowStoreError> {
    match column.datatype {
        Datatype::Text | Datatype::Varchar => String::from_utf8(content.to_vec())
            .map(Value::Text)
            .map_err(|_| RowStoreError::InvalidText {
                table: table.qualified_name(),
            }),
        Datatype::Binary => Ok(Value::Blob(content.to_vec())),
        Datatype::Integer => Err(RowStoreError::Unsupported(format!(
            "{}: content column cannot be an integer",
            table.qualified_name()
        ))),
    }
}
