//! Embedded ordered key-value backend over redb.
//!
//! One table, key `canonical_id\0statement_id`, value the JSON-encoded
//! statement. The key layout makes canonical-id-ascending iteration a
//! plain range scan; scans run in chunks with a fresh read transaction
//! per chunk.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::StoreError;
use crate::statement::Statement;
use crate::store::{StatementBackend, StatementStream};

const CHUNK_SIZE: usize = 10_000;

const STATEMENTS: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("statements");

fn berr(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn statement_key(statement: &Statement) -> String {
    format!("{}\u{0}{}", statement.canonical_id, statement.id)
}

/// Statement store over a single redb database file.
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Opens (or creates) a redb database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(berr)?;
        // create the table up front so first reads never miss it
        let tx = db.begin_write().map_err(berr)?;
        tx.open_table(STATEMENTS).map_err(berr)?;
        tx.commit().map_err(berr)?;
        debug!(path = %path.as_ref().display(), "opened redb statement store");
        Ok(Self { db: Arc::new(db) })
    }

    fn scan<F>(&self, mut visit: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, Statement),
    {
        let tx = self.db.begin_read().map_err(berr)?;
        let table = tx.open_table(STATEMENTS).map_err(berr)?;
        for entry in table.iter().map_err(berr)? {
            let (key, value) = entry.map_err(berr)?;
            let statement: Statement = serde_json::from_slice(value.value())?;
            visit(key.value(), statement);
        }
        Ok(())
    }
}

impl StatementBackend for RedbBackend {
    fn write_batch(&self, statements: &[Statement]) -> Result<(), StoreError> {
        let tx = self.db.begin_write().map_err(berr)?;
        {
            let mut table = tx.open_table(STATEMENTS).map_err(berr)?;
            for statement in statements {
                let key = statement_key(statement);
                let value = serde_json::to_vec(statement)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(berr)?;
            }
        }
        tx.commit().map_err(berr)?;
        Ok(())
    }

    fn get_statements(&self, canonical_id: &str) -> Result<Vec<Statement>, StoreError> {
        let tx = self.db.begin_read().map_err(berr)?;
        let table = tx.open_table(STATEMENTS).map_err(berr)?;
        let start = format!("{canonical_id}\u{0}");
        let end = format!("{canonical_id}\u{1}");
        let mut out = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(berr)?
        {
            let (_, value) = entry.map_err(berr)?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    fn iter_statements(&self, datasets: &BTreeSet<String>) -> StatementStream {
        Box::new(RedbIter {
            db: self.db.clone(),
            datasets: datasets.clone(),
            cursor: None,
            chunk: Vec::new(),
            done: false,
        })
    }

    fn delete_entity(&self, entity_id: &str) -> Result<(), StoreError> {
        let mut keys = Vec::new();
        self.scan(|key, statement| {
            if statement.canonical_id == entity_id || statement.entity_id == entity_id {
                keys.push(key.to_string());
            }
        })?;
        let tx = self.db.begin_write().map_err(berr)?;
        {
            let mut table = tx.open_table(STATEMENTS).map_err(berr)?;
            for key in &keys {
                table.remove(key.as_str()).map_err(berr)?;
            }
        }
        tx.commit().map_err(berr)?;
        Ok(())
    }

    fn delete_dataset(&self, dataset: &str) -> Result<(), StoreError> {
        let mut keys = Vec::new();
        self.scan(|key, statement| {
            if statement.dataset == dataset {
                keys.push(key.to_string());
            }
        })?;
        let tx = self.db.begin_write().map_err(berr)?;
        {
            let mut table = tx.open_table(STATEMENTS).map_err(berr)?;
            for key in &keys {
                table.remove(key.as_str()).map_err(berr)?;
            }
        }
        tx.commit().map_err(berr)?;
        Ok(())
    }

    fn dataset_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut out = BTreeSet::new();
        self.scan(|_, statement| {
            out.insert(statement.dataset);
        })?;
        Ok(out)
    }

    fn origin_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut out = BTreeSet::new();
        self.scan(|_, statement| {
            out.insert(statement.origin);
        })?;
        Ok(out)
    }
}

/// Chunked range scan; the read transaction lives only for one refill.
struct RedbIter {
    db: Arc<Database>,
    datasets: BTreeSet<String>,
    cursor: Option<String>,
    chunk: Vec<Statement>,
    done: bool,
}

impl RedbIter {
    fn refill(&mut self) -> Result<(), StoreError> {
        use std::ops::Bound;
        let tx = self.db.begin_read().map_err(berr)?;
        let table = tx.open_table(STATEMENTS).map_err(berr)?;
        let start = self.cursor.take();
        let lower = match &start {
            Some(key) => Bound::Excluded(key.as_str()),
            None => Bound::Unbounded,
        };
        let mut taken = Vec::new();
        let mut scanned = 0;
        let mut last_key = start.clone();
        for entry in table.range::<&str>((lower, Bound::Unbounded)).map_err(berr)? {
            if scanned >= CHUNK_SIZE {
                break;
            }
            scanned += 1;
            let (key, value) = entry.map_err(berr)?;
            last_key = Some(key.value().to_string());
            let statement: Statement = serde_json::from_slice(value.value())?;
            if self.datasets.is_empty() || self.datasets.contains(&statement.dataset) {
                taken.push(statement);
            }
        }
        self.cursor = last_key;
        if scanned < CHUNK_SIZE {
            self.done = true;
        }
        taken.reverse();
        self.chunk = taken;
        Ok(())
    }
}

impl Iterator for RedbIter {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(entity_id: &str, prop: &str, value: &str, dataset: &str) -> Statement {
        Statement::new(entity_id, "Person", prop, value, dataset)
    }

    fn backend() -> (tempfile::TempDir, RedbBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("statements.redb")).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_write_and_get_roundtrip() {
        let (_dir, backend) = backend();
        let original = stmt("e1", "name", "Jane", "ds").with_lang("en");
        backend.write_batch(&[original.clone()]).unwrap();
        let got = backend.get_statements("e1").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], original);
        assert!(backend.get_statements("nope").unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let (_dir, backend) = backend();
        let s = stmt("e1", "name", "Jane", "ds");
        backend.write_batch(&[s.clone()]).unwrap();
        backend.write_batch(&[s]).unwrap();
        assert_eq!(backend.get_statements("e1").unwrap().len(), 1);
    }

    #[test]
    fn test_iteration_canonical_ascending() {
        let (_dir, backend) = backend();
        backend
            .write_batch(&[
                stmt("b", "name", "B", "ds"),
                stmt("a", "name", "A", "ds"),
                stmt("c", "name", "C", "ds"),
            ])
            .unwrap();
        let ids: Vec<String> = backend
            .iter_statements(&BTreeSet::new())
            .map(|r| r.unwrap().canonical_id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_iteration_filters_datasets() {
        let (_dir, backend) = backend();
        backend
            .write_batch(&[stmt("a", "name", "A", "d1"), stmt("b", "name", "B", "d2")])
            .unwrap();
        let only: BTreeSet<String> = std::iter::once("d1".to_string()).collect();
        let got: Vec<Statement> = backend.iter_statements(&only).map(Result::unwrap).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].dataset, "d1");
    }

    #[test]
    fn test_delete_entity_and_dataset() {
        let (_dir, backend) = backend();
        backend
            .write_batch(&[
                stmt("raw-1", "name", "A", "d1").with_canonical_id("canon"),
                stmt("e2", "name", "B", "d1"),
            ])
            .unwrap();
        backend.delete_entity("raw-1").unwrap();
        assert!(backend.get_statements("canon").unwrap().is_empty());
        assert_eq!(backend.get_statements("e2").unwrap().len(), 1);

        backend.delete_dataset("d1").unwrap();
        assert!(backend.dataset_names().unwrap().is_empty());
    }

    #[test]
    fn test_introspection() {
        let (_dir, backend) = backend();
        backend
            .write_batch(&[
                stmt("a", "name", "A", "d1"),
                stmt("b", "name", "B", "d2").with_origin("crawl"),
            ])
            .unwrap();
        assert_eq!(backend.dataset_names().unwrap().len(), 2);
        assert!(backend.origin_names().unwrap().contains("crawl"));
    }
}
