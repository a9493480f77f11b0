//! Statement assembly.
//!
//! Assembly merges all statements sharing one canonical id into a single
//! [`Entity`]. It is pure and deterministic: a fixed statement multiset
//! yields the same entity regardless of input order, because statements are
//! sorted by (first_seen, id) before folding.

use crate::entity::Entity;
use crate::error::SchemaConflict;
use crate::schema::SchemaRegistry;
use crate::statement::Statement;

/// Assembles the statements of one canonical id into an entity.
///
/// Returns `Ok(None)` for empty input. Values within a property collect in
/// first-seen order with exact-string dedup; properties flagged exclusive in
/// the registry instead keep the single last-written value (by last_seen,
/// then statement id). The entity schema is the join of all contributing
/// schemas; incomparable schemas fail with [`SchemaConflict`] unless
/// `downgrade` permits falling back to their nearest shared ancestor.
pub fn assemble(
    registry: &SchemaRegistry,
    statements: impl IntoIterator<Item = Statement>,
    downgrade: bool,
) -> Result<Option<Entity>, SchemaConflict> {
    let mut stmts: Vec<Statement> = statements.into_iter().collect();
    if stmts.is_empty() {
        return Ok(None);
    }
    // deterministic fold order, independent of the input iteration order
    stmts.sort_by(|a, b| (a.first_seen, &a.id).cmp(&(b.first_seen, &b.id)));
    stmts.dedup_by(|a, b| a.id == b.id);

    let mut schema = stmts[0].schema.clone();
    for stmt in &stmts[1..] {
        schema = registry.join(&schema, &stmt.schema, downgrade)?;
    }

    let mut entity = Entity::new(stmts[0].canonical_id.clone(), schema);
    let mut exclusive_last: Vec<(String, Statement)> = Vec::new();

    for stmt in stmts {
        entity.datasets.insert(stmt.dataset.clone());
        entity.origins.insert(stmt.origin.clone());
        entity.referents.insert(stmt.entity_id.clone());

        let is_exclusive = registry
            .property(&entity.schema, &stmt.prop)
            .or_else(|| registry.find_property(&stmt.prop))
            .is_some_and(|spec| spec.exclusive);
        if is_exclusive {
            match exclusive_last.iter_mut().find(|(prop, _)| *prop == stmt.prop) {
                Some((_, winner)) => {
                    if (stmt.last_seen, &stmt.id) > (winner.last_seen, &winner.id) {
                        *winner = stmt;
                    }
                }
                None => exclusive_last.push((stmt.prop.clone(), stmt)),
            }
        } else {
            entity.add(stmt.prop, stmt.value);
        }
    }

    for (prop, stmt) in exclusive_last {
        entity.set(prop, vec![stmt.value]);
    }

    Ok(Some(entity))
}

/// Assembles a canonical-id-ascending statement stream into entities.
///
/// Consecutive statements with the same canonical id group into one entity;
/// the stream's ordering contract makes this a single pass.
pub struct AssembleIter<I> {
    registry: std::sync::Arc<SchemaRegistry>,
    statements: I,
    pending: Option<Statement>,
    downgrade: bool,
}

impl<I> AssembleIter<I> {
    /// Wraps a canonical-id-ascending statement stream.
    pub fn new(
        registry: std::sync::Arc<SchemaRegistry>,
        statements: I,
        downgrade: bool,
    ) -> Self {
        Self {
            registry,
            statements,
            pending: None,
            downgrade,
        }
    }
}

impl<I, E> Iterator for AssembleIter<I>
where
    I: Iterator<Item = Result<Statement, E>>,
{
    type Item = Result<Entity, AssembleStreamError<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut group: Vec<Statement> = Vec::new();
        if let Some(first) = self.pending.take() {
            group.push(first);
        }
        loop {
            match self.statements.next() {
                Some(Ok(stmt)) => {
                    if let Some(current) = group.first() {
                        if stmt.canonical_id != current.canonical_id {
                            self.pending = Some(stmt);
                            break;
                        }
                    }
                    group.push(stmt);
                }
                Some(Err(err)) => return Some(Err(AssembleStreamError::Source(err))),
                None => break,
            }
        }
        if group.is_empty() {
            return None;
        }
        match assemble(&self.registry, group, self.downgrade) {
            Ok(Some(entity)) => Some(Ok(entity)),
            // non-empty input always yields an entity
            Ok(None) => None,
            Err(conflict) => Some(Err(AssembleStreamError::Conflict(conflict))),
        }
    }
}

/// Failure while assembling a statement stream: either the stream itself
/// errored or one entity's schemas could not be reconciled.
#[derive(Debug)]
pub enum AssembleStreamError<E> {
    /// The underlying statement stream failed.
    Source(E),
    /// One entity's schemas could not be reconciled.
    Conflict(SchemaConflict),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn stmt(entity_id: &str, schema: &str, prop: &str, value: &str) -> Statement {
        Statement::new(entity_id, schema, prop, value, "ds")
    }

    #[test]
    fn test_assemble_empty() {
        let registry = SchemaRegistry::builtin();
        assert!(assemble(&registry, vec![], false).unwrap().is_none());
    }

    #[test]
    fn test_assemble_groups_properties() {
        let registry = SchemaRegistry::builtin();
        let entity = assemble(
            &registry,
            vec![
                stmt("e1", "Person", "name", "Jane"),
                stmt("e1", "Person", "name", "Jane Doe"),
                stmt("e1", "Person", "country", "de"),
            ],
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(entity.id, "e1");
        assert_eq!(entity.schema, "Person");
        assert_eq!(entity.get("country"), ["de"]);
        assert_eq!(entity.get("name").len(), 2);
        assert_eq!(entity.datasets.len(), 1);
        assert!(entity.referents.contains("e1"));
    }

    #[test]
    fn test_assemble_order_independent() {
        let registry = SchemaRegistry::builtin();
        let statements = vec![
            stmt("e1", "Person", "name", "Jane"),
            stmt("e1", "Person", "name", "Jane Doe"),
            stmt("e1", "Person", "country", "de"),
        ];
        let forward = assemble(&registry, statements.clone(), false)
            .unwrap()
            .unwrap();
        let reversed = assemble(&registry, statements.into_iter().rev().collect::<Vec<_>>(), false)
            .unwrap()
            .unwrap();
        assert_eq!(forward.properties, reversed.properties);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_assemble_dedups_statement_ids() {
        let registry = SchemaRegistry::builtin();
        let one = stmt("e1", "Person", "name", "Jane");
        let entity = assemble(&registry, vec![one.clone(), one], false)
            .unwrap()
            .unwrap();
        assert_eq!(entity.get("name"), ["Jane"]);
    }

    #[test]
    fn test_assemble_schema_widening() {
        let registry = SchemaRegistry::builtin();
        // subtype plus ancestor widens to the subtype, never the ancestor
        let entity = assemble(
            &registry,
            vec![
                stmt("a", "LegalEntity", "name", "Jane"),
                stmt("a", "Person", "name", "Jane Doe"),
            ],
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(entity.schema, "Person");
        assert_eq!(entity.get("name"), ["Jane", "Jane Doe"]);
    }

    #[test]
    fn test_assemble_schema_conflict_and_downgrade() {
        let registry = SchemaRegistry::builtin();
        let statements = vec![
            stmt("a", "Company", "name", "Jane"),
            stmt("a", "Person", "name", "Jane Doe"),
        ];
        let err = assemble(&registry, statements.clone(), false).unwrap_err();
        assert_eq!(err.left, "Company");
        assert_eq!(err.right, "Person");

        let entity = assemble(&registry, statements, true).unwrap().unwrap();
        assert_eq!(entity.schema, "LegalEntity");
        let mut names = entity.get("name").to_vec();
        names.sort();
        assert_eq!(names, ["Jane", "Jane Doe"]);
    }

    #[test]
    fn test_assemble_merges_referents_and_datasets() {
        let registry = SchemaRegistry::builtin();
        let a = Statement::new("raw-1", "Person", "name", "Jane", "ds1").with_canonical_id("canon");
        let b = Statement::new("raw-2", "Person", "name", "J. Doe", "ds2").with_canonical_id("canon");
        let entity = assemble(&registry, vec![a, b], false).unwrap().unwrap();
        assert_eq!(entity.id, "canon");
        assert_eq!(entity.referents, ["raw-1", "raw-2"].iter().map(|s| (*s).to_string()).collect());
        assert_eq!(entity.datasets, ["ds1", "ds2"].iter().map(|s| (*s).to_string()).collect());
    }

    #[test]
    fn test_assemble_exclusive_last_writer_wins() {
        use crate::schema::{PropertySpec, PropertyType, SchemaSpec};
        let registry = SchemaRegistry::new([SchemaSpec::new("Reading", "Reading", "Readings")
            .prop_spec(PropertySpec::new("level", PropertyType::Number).exclusive())]);

        let now = Utc::now();
        let mut old = Statement::new("e1", "Reading", "level", "1", "ds");
        old.last_seen = now - Duration::hours(1);
        let mut new = Statement::new("e1", "Reading", "level", "2", "ds");
        new.last_seen = now;

        let entity = assemble(&registry, vec![new.clone(), old.clone()], false)
            .unwrap()
            .unwrap();
        assert_eq!(entity.get("level"), ["2"]);
        // order independent as well
        let entity = assemble(&registry, vec![old, new], false).unwrap().unwrap();
        assert_eq!(entity.get("level"), ["2"]);
    }

    #[test]
    fn test_assemble_iter_groups_by_canonical_id() {
        let registry = SchemaRegistry::builtin();
        let statements: Vec<Result<Statement, std::convert::Infallible>> = vec![
            Ok(stmt("a", "Person", "name", "A")),
            Ok(stmt("a", "Person", "country", "de")),
            Ok(stmt("b", "Person", "name", "B")),
        ];
        let entities: Vec<Entity> = AssembleIter::new(registry, statements.into_iter(), false)
            .map(|r| r.map_err(|_| ()).unwrap())
            .collect();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "a");
        assert_eq!(entities[1].id, "b");
        assert!(entities[0].has("country"));
    }
}
