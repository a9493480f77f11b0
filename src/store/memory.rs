//! In-memory statement backend.
//!
//! Statements live in a `BTreeMap` keyed (canonical_id, statement_id), so
//! canonical-id-ascending iteration falls out of the key order. Contents
//! are lost on drop; this backend exists for tests and ephemeral
//! pipelines.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use crate::error::StoreError;
use crate::statement::Statement;
use crate::store::{StatementBackend, StatementStream};

const CHUNK_SIZE: usize = 10_000;

type StatementMap = BTreeMap<(String, String), Statement>;

/// Shared, lock-guarded statement map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    statements: Arc<RwLock<StatementMap>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_err<T>(_: T) -> StoreError {
    StoreError::Backend("statement map lock poisoned".to_string())
}

impl StatementBackend for MemoryBackend {
    fn write_batch(&self, statements: &[Statement]) -> Result<(), StoreError> {
        let mut map = self.statements.write().map_err(lock_err)?;
        for statement in statements {
            map.insert(
                (statement.canonical_id.clone(), statement.id.clone()),
                statement.clone(),
            );
        }
        Ok(())
    }

    fn get_statements(&self, canonical_id: &str) -> Result<Vec<Statement>, StoreError> {
        let map = self.statements.read().map_err(lock_err)?;
        Ok(map
            .range(range_of(canonical_id))
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn iter_statements(&self, datasets: &BTreeSet<String>) -> StatementStream {
        Box::new(MemoryIter {
            statements: self.statements.clone(),
            datasets: datasets.clone(),
            last_key: None,
            chunk: Vec::new(),
            done: false,
        })
    }

    fn delete_entity(&self, entity_id: &str) -> Result<(), StoreError> {
        let mut map = self.statements.write().map_err(lock_err)?;
        // the id may be a canonical id or a raw entity id
        let keys: Vec<(String, String)> = map
            .iter()
            .filter(|((canonical, _), s)| canonical == entity_id || s.entity_id == entity_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            map.remove(&key);
        }
        Ok(())
    }

    fn delete_dataset(&self, dataset: &str) -> Result<(), StoreError> {
        let mut map = self.statements.write().map_err(lock_err)?;
        map.retain(|_, s| s.dataset != dataset);
        Ok(())
    }

    fn dataset_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let map = self.statements.read().map_err(lock_err)?;
        Ok(map.values().map(|s| s.dataset.clone()).collect())
    }

    fn origin_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let map = self.statements.read().map_err(lock_err)?;
        Ok(map.values().map(|s| s.origin.clone()).collect())
    }
}

fn range_of(canonical_id: &str) -> impl std::ops::RangeBounds<(String, String)> {
    use std::ops::Bound;
    (
        Bound::Included((canonical_id.to_string(), String::new())),
        Bound::Excluded((format!("{canonical_id}\u{0}"), String::new())),
    )
}

/// Chunked scan over the shared map. The read lock is taken per chunk,
/// never held across yields.
struct MemoryIter {
    statements: Arc<RwLock<StatementMap>>,
    datasets: BTreeSet<String>,
    last_key: Option<(String, String)>,
    chunk: Vec<Statement>,
    done: bool,
}

impl MemoryIter {
    fn refill(&mut self) -> Result<(), StoreError> {
        use std::ops::Bound;
        let map = self.statements.read().map_err(lock_err)?;
        let lower = match self.last_key.take() {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let mut taken = Vec::new();
        let mut scanned = 0;
        for (key, statement) in map.range((lower, Bound::Unbounded)) {
            if scanned >= CHUNK_SIZE {
                break;
            }
            scanned += 1;
            self.last_key = Some(key.clone());
            if self.datasets.is_empty() || self.datasets.contains(&statement.dataset) {
                taken.push(statement.clone());
            }
        }
        if scanned < CHUNK_SIZE {
            self.done = true;
        }
        // reverse so pop() yields in ascending order
        taken.reverse();
        self.chunk = taken;
        Ok(())
    }
}

impl Iterator for MemoryIter {
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

    #[test]
    fn test_write_and_get() {
        let backend = MemoryBackend::new();
        backend
            .write_batch(&[stmt("e1", "name", "Jane", "ds"), stmt("e2", "name", "Bob", "ds")])
            .unwrap();
        let got = backend.get_statements("e1").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value, "Jane");
        assert!(backend.get_statements("nope").unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let backend = MemoryBackend::new();
        let s = stmt("e1", "name", "Jane", "ds");
        backend.write_batch(&[s.clone()]).unwrap();
        backend.write_batch(&[s]).unwrap();
        assert_eq!(backend.get_statements("e1").unwrap().len(), 1);
    }

    #[test]
    fn test_iteration_is_canonical_ascending() {
        let backend = MemoryBackend::new();
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
        let backend = MemoryBackend::new();
        backend
            .write_batch(&[stmt("a", "name", "A", "d1"), stmt("b", "name", "B", "d2")])
            .unwrap();
        let datasets: BTreeSet<String> = std::iter::once("d2".to_string()).collect();
        let got: Vec<Statement> = backend
            .iter_statements(&datasets)
            .map(Result::unwrap)
            .collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].canonical_id, "b");
    }

    #[test]
    fn test_delete_entity_by_either_id() {
        let backend = MemoryBackend::new();
        backend
            .write_batch(&[
                stmt("raw-1", "name", "A", "ds").with_canonical_id("canon"),
                stmt("b", "name", "B", "ds"),
            ])
            .unwrap();
        backend.delete_entity("raw-1").unwrap();
        assert!(backend.get_statements("canon").unwrap().is_empty());
        assert_eq!(backend.get_statements("b").unwrap().len(), 1);
    }

    #[test]
    fn test_delete_dataset() {
        let backend = MemoryBackend::new();
        backend
            .write_batch(&[stmt("a", "name", "A", "d1"), stmt("b", "name", "B", "d2")])
            .unwrap();
        backend.delete_dataset("d1").unwrap();
        assert_eq!(backend.dataset_names().unwrap().len(), 1);
        assert!(backend.get_statements("a").unwrap().is_empty());
    }

    #[test]
    fn test_introspection() {
        let backend = MemoryBackend::new();
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
