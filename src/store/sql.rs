//! Relational backend over SQLite.
//!
//! One flat `statements` table, one row per statement. Idempotency comes
//! from `INSERT OR IGNORE` on the deterministic statement id. Iteration
//! is keyset-paginated on (canonical_id, id) in 10_000-row chunks; no
//! statement or transaction is held across yields.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::error::StoreError;
use crate::statement::Statement;
use crate::store::{StatementBackend, StatementStream};

const CHUNK_SIZE: usize = 10_000;

const COLUMNS: &str = "id, entity_id, canonical_id, schema, prop, value, \
                       original_value, lang, dataset, origin, first_seen, last_seen";

const DDL: &str = "
CREATE TABLE IF NOT EXISTS statements (
    id             TEXT PRIMARY KEY,
    entity_id      TEXT NOT NULL,
    canonical_id   TEXT NOT NULL,
    schema         TEXT NOT NULL,
    prop           TEXT NOT NULL,
    value          TEXT NOT NULL,
    original_value TEXT,
    lang           TEXT,
    dataset        TEXT NOT NULL,
    origin         TEXT NOT NULL,
    first_seen     TEXT NOT NULL,
    last_seen      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_statements_canonical ON statements (canonical_id, id);
CREATE INDEX IF NOT EXISTS ix_statements_entity ON statements (entity_id);
CREATE INDEX IF NOT EXISTS ix_statements_dataset ON statements (dataset);
";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Statement store over a single SQLite connection.
pub struct SqlBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqlBackend {
    /// Opens a SQLite database from a connection URI.
    ///
    /// `sqlite:///path/to.db` opens a file, `sqlite://:memory:` (or an
    /// empty path) an in-memory database.
    pub fn open(uri: &str) -> Result<Self, StoreError> {
        let path = uri.split_once("://").map_or(uri, |(_, rest)| rest);
        let conn = if path.is_empty() || path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch(DDL)?;
        debug!(uri, "opened sql statement store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn lock_err<T>(_: T) -> StoreError {
    StoreError::Backend("connection lock poisoned".to_string())
}

fn parse_seen(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

type Row = (
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    String,
);

fn row_to_statement(row: Row) -> Result<Statement, StoreError> {
    let (id, entity_id, canonical_id, schema, prop, value, original_value, lang, dataset, origin, first_seen, last_seen) =
        row;
    Ok(Statement {
        id,
        entity_id,
        canonical_id,
        schema,
        prop,
        value,
        original_value,
        lang,
        dataset,
        origin,
        first_seen: parse_seen(&first_seen)?,
        last_seen: parse_seen(&last_seen)?,
    })
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

impl StatementBackend for SqlBackend {
    fn write_batch(&self, statements: &[Statement]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(&format!(
                "INSERT OR IGNORE INTO statements ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ))?;
            for s in statements {
                insert.execute(rusqlite::params![
                    s.id,
                    s.entity_id,
                    s.canonical_id,
                    s.schema,
                    s.prop,
                    s.value,
                    s.original_value,
                    s.lang,
                    s.dataset,
                    s.origin,
                    s.first_seen.to_rfc3339(),
                    s.last_seen.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_statements(&self, canonical_id: &str) -> Result<Vec<Statement>, StoreError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM statements WHERE canonical_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([canonical_id], read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row_to_statement(row?)?);
        }
        Ok(out)
    }

    fn iter_statements(&self, datasets: &BTreeSet<String>) -> StatementStream {
        Box::new(SqlIter {
            conn: self.conn.clone(),
            datasets: datasets.iter().cloned().collect(),
            cursor: None,
            chunk: Vec::new(),
            done: false,
        })
    }

    fn delete_entity(&self, entity_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.execute(
            "DELETE FROM statements WHERE entity_id = ?1 OR canonical_id = ?1",
            [entity_id],
        )?;
        Ok(())
    }

    fn delete_dataset(&self, dataset: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.execute("DELETE FROM statements WHERE dataset = ?1", [dataset])?;
        Ok(())
    }

    fn dataset_names(&self) -> Result<BTreeSet<String>, StoreError> {
        self.distinct("dataset")
    }

    fn origin_names(&self) -> Result<BTreeSet<String>, StoreError> {
        self.distinct("origin")
    }
}

impl SqlBackend {
    fn distinct(&self, column: &str) -> Result<BTreeSet<String>, StoreError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn.prepare(&format!("SELECT DISTINCT {column} FROM statements"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = BTreeSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }
}

/// Keyset-paginated scan. Each refill runs one bounded SELECT and drops
/// the prepared statement before yielding.
struct SqlIter {
    conn: Arc<Mutex<Connection>>,
    datasets: Vec<String>,
    cursor: Option<(String, String)>,
    chunk: Vec<Statement>,
    done: bool,
}

impl SqlIter {
    fn refill(&mut self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut sql = format!("SELECT {COLUMNS} FROM statements");
        let mut clauses = Vec::new();
        let mut params: Vec<String> = Vec::new();
        if !self.datasets.is_empty() {
            let marks = vec!["?"; self.datasets.len()].join(", ");
            clauses.push(format!("dataset IN ({marks})"));
            params.extend(self.datasets.iter().cloned());
        }
        if let Some((canonical, id)) = &self.cursor {
            clauses.push(format!(
                "(canonical_id, id) > (?{}, ?{})",
                params.len() + 1,
                params.len() + 2
            ));
            params.push(canonical.clone());
            params.push(id.clone());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY canonical_id, id LIMIT {CHUNK_SIZE}"));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), read_row)?;
        let mut taken = Vec::new();
        for row in rows {
            taken.push(row_to_statement(row?)?);
        }
        if taken.len() < CHUNK_SIZE {
            self.done = true;
        }
        if let Some(last) = taken.last() {
            self.cursor = Some((last.canonical_id.clone(), last.id.clone()));
        }
        taken.reverse();
        self.chunk = taken;
        Ok(())
    }
}

impl Iterator for SqlIter {
    type Item = Result<Statement, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(statement) = self.chunk.pop() {
                return Some(Ok(statement));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.refill() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}
