//! Remote key-value backend over Redis.
//!
//! Layout: one hash per canonical id (`entiq:stmts:<canonical_id>`,
//! field = statement id, value = JSON statement), a lexicographic
//! sorted-set index of canonical ids for ordered iteration, and plain
//! sets for dataset and origin introspection. Connections are taken per
//! operation; iteration pages through the id index in chunks.

use std::collections::BTreeSet;

use redis::{Client, Commands, Connection};
use tracing::debug;

use crate::error::StoreError;
use crate::statement::Statement;
use crate::store::{StatementBackend, StatementStream};

const ID_CHUNK_SIZE: isize = 1_000;

const IDS_KEY: &str = "entiq:canonical";
const DATASETS_KEY: &str = "entiq:datasets";
const ORIGINS_KEY: &str = "entiq:origins";

fn hash_key(canonical_id: &str) -> String {
    format!("entiq:stmts:{canonical_id}")
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Statement store over a Redis server.
pub struct RedisBackend {
    client: Client,
}

impl RedisBackend {
    /// Connects to a Redis instance from a `redis://` URI.
    pub fn open(uri: &str) -> Result<Self, StoreError> {
        let client = Client::open(uri)?;
        debug!(uri, "opened redis statement store");
        Ok(Self { client })
    }

    fn connection(&self) -> Result<Connection, StoreError> {
        Ok(self.client.get_connection()?)
    }
}

fn load_statements(conn: &mut Connection, canonical_id: &str) -> Result<Vec<Statement>, StoreError> {
    let raw: Vec<String> = conn.hvals(hash_key(canonical_id))?;
    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        out.push(serde_json::from_str(&value)?);
    }
    out.sort_by(|a: &Statement, b: &Statement| a.id.cmp(&b.id));
    Ok(out)
}

fn drop_entity(conn: &mut Connection, canonical_id: &str) -> Result<(), StoreError> {
    conn.del::<_, ()>(hash_key(canonical_id))?;
    conn.zrem::<_, _, ()>(IDS_KEY, canonical_id)?;
    Ok(())
}

impl StatementBackend for RedisBackend {
    fn write_batch(&self, statements: &[Statement]) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        for statement in statements {
            let body = serde_json::to_string(statement)?;
            conn.hset::<_, _, _, ()>(
                hash_key(&statement.canonical_id),
                &statement.id,
                body,
            )?;
            conn.zadd::<_, _, _, ()>(IDS_KEY, &statement.canonical_id, 0)?;
            conn.sadd::<_, _, ()>(DATASETS_KEY, &statement.dataset)?;
            conn.sadd::<_, _, ()>(ORIGINS_KEY, &statement.origin)?;
        }
        Ok(())
    }

    fn get_statements(&self, canonical_id: &str) -> Result<Vec<Statement>, StoreError> {
        let mut conn = self.connection()?;
        load_statements(&mut conn, canonical_id)
    }

    fn iter_statements(&self, datasets: &BTreeSet<String>) -> StatementStream {
        Box::new(RedisIter {
            client: self.client.clone(),
            datasets: datasets.clone(),
            cursor: None,
            chunk: Vec::new(),
            done: false,
        })
    }

    fn delete_entity(&self, entity_id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        // direct hit on the canonical id
        drop_entity(&mut conn, entity_id)?;
        // raw ids merged into some other canonical id need a scan
        let canonicals: Vec<String> = conn.zrangebylex(IDS_KEY, "-", "+")?;
        for canonical in canonicals {
            let statements = load_statements(&mut conn, &canonical)?;
            let stale: Vec<&str> = statements
                .iter()
                .filter(|s| s.entity_id == entity_id)
                .map(|s| s.id.as_str())
                .collect();
            if stale.is_empty() {
                continue;
            }
            conn.hdel::<_, _, ()>(hash_key(&canonical), stale)?;
            let remaining: isize = conn.hlen(hash_key(&canonical))?;
            if remaining == 0 {
                drop_entity(&mut conn, &canonical)?;
            }
        }
        Ok(())
    }

    fn delete_dataset(&self, dataset: &str) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let canonicals: Vec<String> = conn.zrangebylex(IDS_KEY, "-", "+")?;
        for canonical in canonicals {
            let statements = load_statements(&mut conn, &canonical)?;
            let stale: Vec<&str> = statements
                .iter()
                .filter(|s| s.dataset == dataset)
                .map(|s| s.id.as_str())
                .collect();
            if stale.is_empty() {
                continue;
            }
            conn.hdel::<_, _, ()>(hash_key(&canonical), stale)?;
            let remaining: isize = conn.hlen(hash_key(&canonical))?;
            if remaining == 0 {
                drop_entity(&mut conn, &canonical)?;
            }
        }
        conn.srem::<_, _, ()>(DATASETS_KEY, dataset)?;
        Ok(())
    }

    fn dataset_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut conn = self.connection()?;
        Ok(conn.smembers(DATASETS_KEY)?)
    }

    fn origin_names(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut conn = self.connection()?;
        Ok(conn.smembers(ORIGINS_KEY)?)
    }
}

/// Pages through the canonical-id index lexicographically, loading each
/// id's statement hash as it goes.
struct RedisIter {
    client: Client,
    datasets: BTreeSet<String>,
    cursor: Option<String>,
    chunk: Vec<Statement>,
    done: bool,
}

impl RedisIter {
    fn refill(&mut self) -> Result<(), StoreError> {
        let mut conn = self.client.get_connection()?;
        let min = match &self.cursor {
            Some(id) => format!("({id}"),
            None => "-".to_string(),
        };
        let canonicals: Vec<String> =
            conn.zrangebylex_limit(IDS_KEY, min, "+", 0, ID_CHUNK_SIZE)?;
        if (canonicals.len() as isize) < ID_CHUNK_SIZE {
            self.done = true;
        }
        if let Some(last) = canonicals.last() {
            self.cursor = Some(last.clone());
        }
        let mut taken = Vec::new();
        for canonical in canonicals {
            for statement in load_statements(&mut conn, &canonical)? {
                if self.datasets.is_empty() || self.datasets.contains(&statement.dataset) {
                    taken.push(statement);
                }
            }
        }
        taken.reverse();
        self.chunk = taken;
        Ok(())
    }
}

impl Iterator for RedisIter {
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

    #[test]
    fn test_hash_key_layout() {
        assert_eq!(hash_key("canon-1"), "entiq:stmts:canon-1");
    }

    #[test]
    fn test_open_does_not_connect() {
        // Client::open only parses the URI; connecting happens per op
        assert!(RedisBackend::open("redis://localhost:6379").is_ok());
        assert!(RedisBackend::open("not a uri").is_err());
    }
}
