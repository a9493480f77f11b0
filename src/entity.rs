//! The entity projection.
//!
//! An [`Entity`] is an ephemeral, query-time view over all statements that
//! share a canonical id. It has no storage lifecycle of its own: assembly
//! produces it, and the writer decomposes it back into statements.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::schema::SchemaRegistry;
use crate::statement::{Statement, DEFAULT_DATASET};

/// A query-time projection of one canonical entity.
///
/// # Examples
///
/// ```
/// use entiq::Entity;
///
/// let mut entity = Entity::new("p-1", "Person");
/// entity.add("name", "Jane Doe");
/// entity.add("name", "Jane Doe"); // exact duplicates collapse
/// assert_eq!(entity.get("name"), ["Jane Doe"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical id.
    pub id: String,

    /// Resolved schema name.
    pub schema: String,

    /// Property name mapped to an ordered, deduplicated value list.
    #[serde(default)]
    pub properties: Vec<(String, Vec<String>)>,

    /// Datasets that contributed statements.
    #[serde(default)]
    pub datasets: BTreeSet<String>,

    /// Origin tags of contributing statements.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub origins: BTreeSet<String>,

    /// Raw entity ids merged into this canonical entity.
    #[serde(default)]
    pub referents: BTreeSet<String>,
}

impl Entity {
    /// Creates an empty entity.
    #[must_use]
    pub fn new(id: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            schema: schema.into(),
            properties: Vec::new(),
            datasets: BTreeSet::new(),
            origins: BTreeSet::new(),
            referents: BTreeSet::new(),
        }
    }

    /// Appends a value to a property, preserving insertion order and
    /// dropping exact-string duplicates.
    pub fn add(&mut self, prop: impl Into<String>, value: impl Into<String>) {
        let prop = prop.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(name, _)| *name == prop) {
            Some((_, values)) => {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            None => self.properties.push((prop, vec![value])),
        }
    }

    /// Replaces all values of a property.
    pub fn set(&mut self, prop: impl Into<String>, values: Vec<String>) {
        let prop = prop.into();
        match self.properties.iter_mut().find(|(name, _)| *name == prop) {
            Some((_, existing)) => *existing = values,
            None => self.properties.push((prop, values)),
        }
    }

    /// Values of a property; empty for absent properties.
    #[must_use]
    pub fn get(&self, prop: &str) -> &[String] {
        self.properties
            .iter()
            .find(|(name, _)| name == prop)
            .map_or(&[], |(_, values)| values.as_slice())
    }

    /// First value of a property.
    #[must_use]
    pub fn first(&self, prop: &str) -> Option<&str> {
        self.get(prop).first().map(String::as_str)
    }

    /// Returns true if the property has at least one value.
    #[must_use]
    pub fn has(&self, prop: &str) -> bool {
        !self.get(prop).is_empty()
    }

    /// Property names in insertion order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(name, _)| name.as_str())
    }

    /// Caption derived from the schema's caption property chain: the first
    /// value of the first caption property that has one.
    #[must_use]
    pub fn caption(&self, registry: &SchemaRegistry) -> Option<&str> {
        registry
            .caption_chain(&self.schema)
            .iter()
            .find_map(|prop| self.first(prop))
    }

    /// All values of `Entity`-typed properties: the ids this entity
    /// references, used for adjacency (`reverse`) queries.
    #[must_use]
    pub fn reference_ids(&self, registry: &SchemaRegistry) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        for (prop, values) in &self.properties {
            let is_ref = registry
                .property(&self.schema, prop)
                .or_else(|| registry.find_property(prop))
                .is_some_and(|spec| spec.ptype == crate::schema::PropertyType::Entity);
            if is_ref {
                out.extend(values.iter().map(String::as_str));
            }
        }
        out
    }

    /// Decomposes the entity into statements, one per property value,
    /// tagged with the given origin.
    ///
    /// The statement dataset is the entity's first dataset, or the default
    /// sentinel when the entity names none.
    #[must_use]
    pub fn to_statements(&self, origin: &str) -> Vec<Statement> {
        let dataset = self
            .datasets
            .iter()
            .next()
            .map_or(DEFAULT_DATASET, String::as_str);
        let mut out = Vec::new();
        for (prop, values) in &self.properties {
            for value in values {
                out.push(
                    Statement::new(&self.id, &self.schema, prop, value, dataset)
                        .with_origin(origin),
                );
            }
        }
        out
    }
}
