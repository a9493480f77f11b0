//! Filesystem lake backend.
//!
//! Statements land as append-only JSON files partitioned by dataset,
//! origin and entity:
//!
//! ```text
//! <root>/<dataset>/entities/statements/<origin>/<entity_id>/<checksum>.json
//! ```
//!
//! The checksum is a blake3 hash over the sorted statement ids of the
//! file, so re-ingesting the same fragment lands on the same path and is
//! a no-op. Reads are listing-based: visibility is eventual with respect
//! to concurrent writers, and every iteration call resolves the listing
//! afresh.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StoreError;
use crate::statement::Statement;
use crate::store::{StatementBackend, StatementStream};

const LAKE_BATCH_SIZE: usize = 1_000_000;

/// Append-only statement lake rooted at a directory.
#[derive(Debug)]
pub struct LakeBackend {
    root: PathBuf,
}

impl LakeBackend {
    /// Opens a lake rooted at the given directory, creating it if absent.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn statements_dir(&self, dataset: &str) -> PathBuf {
        self.root.join(dataset).join("entities").join("statements")
    }

    /// All statement file paths under the given datasets (all when empty).
    fn fragment_files(&self, datasets: &BTreeSet<String>) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for dataset in self.list_dirs(&self.root)? {
            if !datasets.is_empty() && !datasets.contains(&dataset) {
                continue;
            }
            let statements = self.statements_dir(&dataset);
            if !statements.is_dir() {
                continue;
            }
            for origin in self.list_dirs(&statements)? {
                for entity in self.list_dirs(&statements.join(&origin))? {
                    let dir = statements.join(&origin).join(&entity);
                    for entry in fs::read_dir(&dir)? {
                        let path = entry?.path();
                        if path.extension().is_some_and(|e| e == "json") {
                            files.push(path);
                        }
                    }
                }
            }
        }
        Ok(files)
    }

    fn list_dirs(&self, path: &Path) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        if !path.is_dir() {
            return Ok(out);
        }
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }

    fn load_all(
        &self,
        datasets: &BTreeSet<String>,
    ) -> Result<BTreeMap<(String, String), Statement>, StoreError> {
        let mut out = BTreeMap::new();
        for path in self.fragment_files(datasets)? {
            for statement in read_fragment(&path)? {
                out.insert(
                    (statement.canonical_id.clone(), statement.id.clone()),
                    statement,
                );
            }
        }
        Ok(out)
    }
}

fn read_fragment(path: &Path) -> Result<Vec<Statement>, StoreError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn fragment_checksum(statements: &[&Statement]) -> String {
    let mut ids: Vec<&str> = statements.iter().map(|s| s.id.as_str()).collect();
    ids.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\x1e");
    }
    hasher.finalize().to_hex().to_string()
}

impl StatementBackend for LakeBackend {
    fn write_batch(&self, statements: &[Statement]) -> Result<(), StoreError> {
        let mut fragments: BTreeMap<(String, String, String), Vec<&Statement>> = BTreeMap::new();
        for statement in statements {
            fragments
                .entry((
                    statement.dataset.clone(),
                    statement.origin.clone(),
                    statement.entity_id.clone(),
                ))
                .or_default()
                .push(statement);
        }
        for ((dataset, origin, entity_id), group) in fragments {
            let dir = self.statements_dir(&dataset).join(&origin).join(&entity_id);
            let checksum = fragment_checksum(&group);
            let path = dir.join(format!("{checksum}.json"));
            if path.exists() {
                continue;
            }
            fs::create_dir_all(&dir)?;
            let body = serde_json::to_vec(&group)?;
            // write to a sibling and rename, so readers never see a torn file
            let tmp = dir.join(format!("{checksum}.json.part"));
            fs::write(&tmp, body)?;
            fs::rename(&tmp, &path)?;
            debug!(dataset, origin, entity_id, "wrote statement fragment");
        }
        Ok(())
    }

    fn get_statements(&self, canonical_id: &str) -> Result<Vec<Statement>, StoreError> {
        let mut out = Vec::new();
        for path in self.fragment_files(&BTreeSet::new())? {
            for statement in read_fragment(&path)? {
                if statement.canonical_id == canonical_id {
                    out.push(statement);
                }
            }
        }
        Ok(out)
    }

    fn iter_statements(&self, datasets: &BTreeSet<String>) -> StatementStream {
        // canonical order cuts across the partition layout, so each call
        // materializes the fragment set before yielding
        let loaded = self.load_all(datasets);
        match loaded {
            Ok(map) => Box::new(map.into_values().map(Ok)),
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }

    fn delete_entity(&self, entity_id: &str) -> Result<(), StoreError> {
        for dataset in self.list_dirs(&self.root)? {
            let statements = self.statements_dir(&dataset);
            for origin in self.list_dirs(&statements)? {
                let dir = statements.join(&origin).join(entity_id);
                if dir.is_dir() {
                    fs::remove_dir_all(&dir)?;
                }
            }
        }
        // fragments of raw entities merged into this canonical id
        for path in self.fragment_files(&BTreeSet::new())? {
            let fragment = read_fragment(&path)?;
            if fragment.iter().any(|s| s.canonical_id == entity_id) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn delete_dataset(&self, dataset: &str) -> Result<(), StoreError> {
        let dir = self.root.join(dataset);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    fn dataset_names(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.list_dirs(&self.root)?.into_iter().collect())
    }

    fn origin_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut out = BTreeSet::new();
        for dataset in self.list_dirs(&self.root)? {
            out.extend(self.list_dirs(&self.statements_dir(&dataset))?);
        }
        Ok(out)
    }

    fn batch_size(&self) -> usize {
        LAKE_BATCH_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(entity_id: &str, prop: &str, value: &str, dataset: &str) -> Statement {
        Statement::new(entity_id, "Person", prop, value, dataset)
    }

    fn lake() -> (tempfile::TempDir, LakeBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LakeBackend::open(dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_fragment_layout() {
        let (dir, backend) = lake();
        backend
            .write_batch(&[stmt("e1", "name", "Jane", "ds").with_origin("crawl")])
            .unwrap();
        let entity_dir = dir
            .path()
            .join("ds")
            .join("entities")
            .join("statements")
            .join("crawl")
            .join("e1");
        assert!(entity_dir.is_dir());
        let files: Vec<_> = fs::read_dir(&entity_dir).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_rewrite_same_fragment_is_noop() {
        let (dir, backend) = lake();
        let batch = [stmt("e1", "name", "Jane", "ds")];
        backend.write_batch(&batch).unwrap();
        backend.write_batch(&batch).unwrap();
        let entity_dir = dir
            .path()
            .join("ds")
            .join("entities")
            .join("statements")
            .join("default")
            .join("e1");
        assert_eq!(fs::read_dir(&entity_dir).unwrap().count(), 1);
        assert_eq!(backend.get_statements("e1").unwrap().len(), 1);
    }

    #[test]
    fn test_iteration_canonical_ascending_across_fragments() {
        let (_dir, backend) = lake();
        backend.write_batch(&[stmt("b", "name", "B", "ds")]).unwrap();
        backend.write_batch(&[stmt("a", "name", "A", "ds")]).unwrap();
        let ids: Vec<String> = backend
            .iter_statements(&BTreeSet::new())
            .map(|r| r.unwrap().canonical_id)
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_iteration_filters_datasets() {
        let (_dir, backend) = lake();
        backend.write_batch(&[stmt("a", "name", "A", "d1")]).unwrap();
        backend.write_batch(&[stmt("b", "name", "B", "d2")]).unwrap();
        let only: BTreeSet<String> = std::iter::once("d1".to_string()).collect();
        let got: Vec<Statement> = backend.iter_statements(&only).map(Result::unwrap).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].dataset, "d1");
    }

    #[test]
    fn test_delete_entity_and_dataset() {
        let (_dir, backend) = lake();
        backend
            .write_batch(&[stmt("e1", "name", "A", "d1"), stmt("e2", "name", "B", "d1")])
            .unwrap();
        backend.delete_entity("e1").unwrap();
        assert!(backend.get_statements("e1").unwrap().is_empty());
        assert_eq!(backend.get_statements("e2").unwrap().len(), 1);

        backend.delete_dataset("d1").unwrap();
        assert!(backend.dataset_names().unwrap().is_empty());
    }

    #[test]
    fn test_introspection() {
        let (_dir, backend) = lake();
        backend
            .write_batch(&[
                stmt("a", "name", "A", "d1"),
                stmt("b", "name", "B", "d2").with_origin("crawl"),
            ])
            .unwrap();
        assert_eq!(
            backend.dataset_names().unwrap(),
            ["d1", "d2"].iter().map(|s| (*s).to_string()).collect()
        );
        assert_eq!(
            backend.origin_names().unwrap(),
            ["crawl", "default"].iter().map(|s| (*s).to_string()).collect()
        );
    }

    #[test]
    fn test_batch_size() {
        let (_dir, backend) = lake();
        assert_eq!(backend.batch_size(), 1_000_000);
    }
}
