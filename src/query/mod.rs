//! The query DSL.
//!
//! A [`Query`] is an immutable, additively built clause set: every builder
//! call consumes the query and returns a new one. Clauses validate eagerly
//! against the schema registry, so a malformed query fails at construction
//! and never reaches a backend.
//!
//! # Examples
//!
//! ```
//! use entiq::Query;
//!
//! let q = Query::default()
//!     .filter("schema", "Payment").unwrap()
//!     .filter("date__gte", "2011").unwrap()
//!     .order_by(&["amountEur"], true)
//!     .slice(0, Some(10)).unwrap();
//! assert_eq!(q.limit, Some(10));
//! ```

mod filter;
mod wire;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

pub use filter::{Comparator, Field, Filter, FilterValue};

use crate::aggregate::{AggFunc, AggregationSpec};
use crate::entity::Entity;
use crate::error::ValidationError;
use crate::schema::SchemaRegistry;

/// Declarative filter/sort/page/aggregate specification.
///
/// Never persisted; serializes bijectively to a flat string-keyed map for
/// cross-boundary transport (see [`Query::to_map`]).
#[derive(Debug, Clone)]
pub struct Query {
    registry: Arc<SchemaRegistry>,
    filters: BTreeMap<(Field, Comparator), Filter>,
    /// Expand the schema clause with subtype descendants.
    pub include_descendants: bool,
    /// Expand the schema clause with the resolver's matchable peer group.
    pub include_matchable: bool,
    /// Sort fields in application order.
    pub sorts: Vec<Sort>,
    /// Result size cap, applied after sorting.
    pub limit: Option<usize>,
    /// Results skipped before the limit applies.
    pub offset: usize,
    /// Aggregations to run over the unpaginated result set.
    pub aggregations: AggregationSpec,
    /// Adjacency filter: only entities referencing this id.
    pub reverse: Option<String>,
}

/// One sort field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// Property name to sort on.
    pub field: String,
    /// Direction; absent values sort last either way.
    pub ascending: bool,
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        // the registry is context, not part of the query's identity
        self.filters == other.filters
            && self.include_descendants == other.include_descendants
            && self.include_matchable == other.include_matchable
            && self.sorts == other.sorts
            && self.limit == other.limit
            && self.offset == other.offset
            && self.aggregations == other.aggregations
            && self.reverse == other.reverse
    }
}

impl Eq for Query {}

impl Default for Query {
    fn default() -> Self {
        Self::new(SchemaRegistry::builtin())
    }
}

impl Query {
    /// Creates an empty query bound to a registry.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            filters: BTreeMap::new(),
            include_descendants: false,
            include_matchable: false,
            sorts: Vec::new(),
            limit: None,
            offset: 0,
            aggregations: AggregationSpec::default(),
            reverse: None,
        }
    }

    /// The registry this query validates against.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Returns true if the query constrains nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.reverse.is_none()
    }

    /// Filter clauses in key order.
    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.filters.values()
    }

    /// Adds a clause. The key is a field name with an optional
    /// `__comparator` suffix; re-setting the same (field, comparator)
    /// replaces the prior value, while distinct comparators on one field
    /// coexist as independent ANDed constraints.
    ///
    /// Validation is eager: unknown fields, comparators and schema names
    /// fail here.
    pub fn filter(
        mut self,
        key: &str,
        value: impl Into<FilterValue>,
    ) -> Result<Self, ValidationError> {
        let value = value.into();
        match key {
            "reverse" => {
                let FilterValue::One(id) = value else {
                    return Err(ValidationError::InvalidValue {
                        field: "reverse".to_string(),
                        reason: "expected a single entity id".to_string(),
                    });
                };
                self.reverse = Some(id);
                return Ok(self);
            }
            "schema_include_descendants" => {
                self.include_descendants = flag_value("schema_include_descendants", value)?;
                return Ok(self);
            }
            "schema_include_matchable" => {
                self.include_matchable = flag_value("schema_include_matchable", value)?;
                return Ok(self);
            }
            _ => {}
        }

        let (name, comparator) = match key.split_once("__") {
            Some((name, suffix)) => (name, Comparator::parse(suffix)?),
            None => (key, Comparator::Eq),
        };
        let field = Field::parse(name, &self.registry)?;

        // the dataset clause takes plain names, nothing else
        if field == Field::Dataset && matches!(value, FilterValue::Flag(_)) {
            return Err(ValidationError::InvalidValue {
                field: "dataset".to_string(),
                reason: "expected dataset name(s)".to_string(),
            });
        }

        let clause = Filter::new(field, comparator, value)?;

        // schema names are validated against the registry up front
        if clause.field == Field::Schema {
            for name in clause_values(&clause) {
                if !self.registry.has(name) {
                    return Err(ValidationError::UnknownSchema {
                        schema: name.to_string(),
                    });
                }
            }
        }

        self.filters.insert(clause.key(), clause);
        Ok(self)
    }

    /// Removes every clause on a field, regardless of comparator.
    #[must_use]
    pub fn without(mut self, field: &str) -> Self {
        self.filters.retain(|(f, _), _| f.name() != field);
        self
    }

    /// Restricts to entities that reference the given id through any
    /// entity-valued property.
    #[must_use]
    pub fn with_reverse(mut self, id: impl Into<String>) -> Self {
        self.reverse = Some(id.into());
        self
    }

    /// Appends sort fields.
    #[must_use]
    pub fn order_by(mut self, fields: &[&str], ascending: bool) -> Self {
        for field in fields {
            self.sorts.push(Sort {
                field: (*field).to_string(),
                ascending,
            });
        }
        self
    }

    /// Maps a slice to offset/limit. `stop` of `None` leaves the result
    /// unbounded; inverted bounds are rejected.
    pub fn slice(mut self, start: usize, stop: Option<usize>) -> Result<Self, ValidationError> {
        if let Some(stop) = stop {
            if stop < start {
                return Err(ValidationError::InvalidSlice { start, stop });
            }
            self.limit = Some(stop - start);
        }
        self.offset = start;
        Ok(self)
    }

    /// Caps the result size.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips over the first `offset` results.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Adds an aggregation. Multiple calls accumulate into one composite
    /// spec; targets must be `id` or registry properties, groups `year` or
    /// a registry property.
    pub fn aggregate(
        mut self,
        func: AggFunc,
        targets: &[&str],
        groups: Option<&str>,
    ) -> Result<Self, ValidationError> {
        for target in targets {
            if *target != "id" && self.registry.find_property(target).is_none() {
                return Err(ValidationError::UnknownField {
                    field: (*target).to_string(),
                });
            }
        }
        if let Some(group) = groups {
            if group != "year" && self.registry.find_property(group).is_none() {
                return Err(ValidationError::UnknownField {
                    field: group.to_string(),
                });
            }
        }
        self.aggregations.add(func, targets, groups);
        Ok(self)
    }

    /// Dataset names constrained by `eq`/`in` clauses.
    #[must_use]
    pub fn dataset_names(&self) -> BTreeSet<String> {
        self.names_for(&Field::Dataset)
    }

    /// Origin names constrained by `eq`/`in` clauses.
    #[must_use]
    pub fn origin_names(&self) -> BTreeSet<String> {
        self.names_for(&Field::Origin)
    }

    /// Country codes constrained by `eq`/`in` clauses.
    #[must_use]
    pub fn countries(&self) -> BTreeSet<String> {
        self.names_for(&Field::Property("country".to_string()))
    }

    /// Schema names constrained by the query, expanded per the
    /// `schema_include_descendants` / `schema_include_matchable`
    /// modifiers. Subtype expansion and matchable peer groups are distinct
    /// semantics and expand independently.
    #[must_use]
    pub fn schemata_names(&self) -> BTreeSet<String> {
        let base = self.names_for(&Field::Schema);
        let mut out = base.clone();
        for name in &base {
            if self.include_descendants {
                out.extend(self.registry.descendants(name));
            }
            if self.include_matchable {
                out.extend(self.registry.matchable_peers(name));
            }
        }
        out
    }

    fn names_for(&self, field: &Field) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for clause in self.filters.values() {
            if clause.field == *field {
                match (&clause.comparator, &clause.value) {
                    (Comparator::Eq, FilterValue::One(v)) => {
                        out.insert(v.clone());
                    }
                    (Comparator::In, FilterValue::Many(set)) => {
                        out.extend(set.iter().cloned());
                    }
                    _ => {}
                }
            }
        }
        out
    }

    /// Evaluates all filter clauses (and the `reverse` adjacency clause)
    /// against one assembled entity.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(target) = &self.reverse {
            if !entity.reference_ids(&self.registry).contains(target.as_str()) {
                return false;
            }
        }
        let schemata = self.schemata_names();
        for clause in self.filters.values() {
            // schema eq/in go through modifier expansion
            if clause.field == Field::Schema
                && matches!(clause.comparator, Comparator::Eq | Comparator::In)
            {
                if !schemata.contains(&entity.schema) {
                    return false;
                }
                continue;
            }
            if !clause.matches(entity, &self.registry) {
                return false;
            }
        }
        true
    }

    /// Sorts entities in place per the query's sort fields: numeric keys
    /// for number-typed properties, lexicographic otherwise; entities
    /// missing the field sort last; ties keep input order (stable sort).
    pub fn sort_entities(&self, entities: &mut [Entity]) {
        for sort in self.sorts.iter().rev() {
            let numeric = self
                .registry
                .find_property(&sort.field)
                .is_some_and(|spec| spec.ptype.is_numeric());
            entities.sort_by(|a, b| {
                let ka = sort_key(a, &sort.field, numeric);
                let kb = sort_key(b, &sort.field, numeric);
                let ord = match (ka, kb) {
                    (None, None) => std::cmp::Ordering::Equal,
                    // absent values sort last regardless of direction
                    (None, Some(_)) => return std::cmp::Ordering::Greater,
                    (Some(_), None) => return std::cmp::Ordering::Less,
                    (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
                };
                if sort.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
    }

    /// Applies filter, sort and pagination to an entity sequence.
    ///
    /// This is the in-process execution path used by views and usable
    /// standalone against any entity iterator.
    #[must_use]
    pub fn apply_iter(&self, entities: impl IntoIterator<Item = Entity>) -> Vec<Entity> {
        let mut matched: Vec<Entity> = entities
            .into_iter()
            .filter(|e| self.matches(e))
            .collect();
        self.sort_entities(&mut matched);
        let mut out: Vec<Entity> = matched.into_iter().skip(self.offset).collect();
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

#[derive(Debug, PartialEq, PartialOrd)]
enum SortKey<'a> {
    Num(f64),
    Text(&'a str),
}

fn sort_key<'a>(entity: &'a Entity, field: &str, numeric: bool) -> Option<SortKey<'a>> {
    let value = entity.first(field)?;
    if numeric {
        value.trim().parse::<f64>().ok().map(SortKey::Num)
    } else {
        Some(SortKey::Text(value))
    }
}

fn clause_values(clause: &Filter) -> Vec<&str> {
    match &clause.value {
        FilterValue::One(v) => vec![v.as_str()],
        FilterValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        FilterValue::Flag(_) => Vec::new(),
    }
}

fn flag_value(field: &str, value: FilterValue) -> Result<bool, ValidationError> {
    match value {
        FilterValue::Flag(flag) => Ok(flag),
        _ => Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query() {
        let q = Query::default();
        assert!(q.is_empty());
        assert_eq!(q.filters().count(), 0);
    }

    #[test]
    fn test_filter_clause_identity() {
        // same (field, comparator) replaces
        let q = Query::default()
            .filter("dataset", "test")
            .unwrap()
            .filter("dataset", "test")
            .unwrap();
        assert_eq!(q.filters().count(), 1);

        let q = Query::default()
            .filter("dataset", "test")
            .unwrap()
            .filter("dataset", "other")
            .unwrap();
        assert_eq!(q.filters().count(), 1);
        assert_eq!(q.dataset_names(), std::iter::once("other".to_string()).collect());

        // distinct comparators on one field coexist
        let q = Query::default()
            .filter("date", "2023")
            .unwrap()
            .filter("date__gte", "2023")
            .unwrap()
            .filter("date", "2024")
            .unwrap()
            .filter("startDate", "2024")
            .unwrap();
        assert_eq!(q.filters().count(), 3);
    }

    #[test]
    fn test_filter_validation() {
        assert!(Query::default().filter("foo", "bar").is_err());
        assert!(Query::default().filter("schema", "NoSuchSchema").is_err());
        assert!(Query::default().filter("date__foo", "2023").is_err());
        assert!(Query::default().filter("name__gte", vec!["a", "b"]).is_err());
        assert!(Query::default().filter("dataset", true).is_err());
    }

    #[test]
    fn test_schema_set_validated_per_member() {
        // every member of a set-valued schema clause is checked
        assert!(Query::default()
            .filter("schema__in", vec!["Person", "NoSuchSchema"])
            .is_err());
        let q = Query::default()
            .filter("schema__in", vec!["Person", "Company"])
            .unwrap();
        assert_eq!(q.schemata_names().len(), 2);
    }

    #[test]
    fn test_filter_value_coercion() {
        let q = Query::default().filter("name__in", "test").unwrap();
        let clause = q.filters().next().unwrap();
        assert_eq!(
            clause.value,
            FilterValue::Many(std::iter::once("test".to_string()).collect())
        );

        let q = Query::default().filter("date", 2023i64).unwrap();
        let clause = q.filters().next().unwrap();
        assert_eq!(clause.value, FilterValue::One("2023".to_string()));
    }

    #[test]
    fn test_without_removes_all_comparators() {
        let q = Query::default()
            .filter("dataset__in", vec!["d1", "d2"])
            .unwrap()
            .filter("schema", "Person")
            .unwrap()
            .without("dataset")
            .without("schema")
            .filter("dataset", "test")
            .unwrap();
        assert_eq!(q.filters().count(), 1);
        assert_eq!(q.dataset_names(), std::iter::once("test".to_string()).collect());
    }

    #[test]
    fn test_shorthand_names() {
        let q = Query::default()
            .filter("dataset", "foo")
            .unwrap()
            .filter("schema", "Person")
            .unwrap()
            .filter("country", "fr")
            .unwrap();
        assert_eq!(q.schemata_names(), std::iter::once("Person".to_string()).collect());
        assert_eq!(q.dataset_names(), std::iter::once("foo".to_string()).collect());
        assert_eq!(q.countries(), std::iter::once("fr".to_string()).collect());

        let q = Query::default()
            .filter("dataset__in", vec!["foo", "bar"])
            .unwrap()
            .filter("schema__in", vec!["Person", "Company"])
            .unwrap()
            .filter("country__in", vec!["de", "fr"])
            .unwrap();
        assert_eq!(q.dataset_names().len(), 2);
        assert_eq!(q.schemata_names().len(), 2);
        assert_eq!(q.countries().len(), 2);
    }

    #[test]
    fn test_origin_names() {
        let q = Query::default().filter("origin", "test").unwrap();
        assert_eq!(q.origin_names(), std::iter::once("test".to_string()).collect());
    }

    #[test]
    fn test_schema_expansion_descendants_vs_matchable() {
        let q = Query::default()
            .filter("schema", "LegalEntity")
            .unwrap()
            .filter("schema_include_descendants", true)
            .unwrap();
        assert_eq!(q.schemata_names().len(), 5);

        let q = Query::default()
            .filter("schema", "Person")
            .unwrap()
            .filter("schema_include_matchable", true)
            .unwrap();
        assert_eq!(q.schemata_names().len(), 2);
    }

    #[test]
    fn test_order_by_appends() {
        let q = Query::default().order_by(&["date", "name"], true);
        assert_eq!(q.sorts.len(), 2);
        let q = q.order_by(&["amountEur"], false);
        assert_eq!(q.sorts.len(), 3);
        assert!(!q.sorts[2].ascending);
    }

    #[test]
    fn test_slice() {
        let q = Query::default().slice(1, Some(10)).unwrap();
        assert_eq!(q.offset, 1);
        assert_eq!(q.limit, Some(9));
        let q = Query::default().slice(0, None).unwrap();
        assert_eq!(q.limit, None);
        assert!(Query::default().slice(10, Some(3)).is_err());
    }

    #[test]
    fn test_aggregate_accumulates() {
        let q = Query::default()
            .aggregate(AggFunc::Max, &["date"], None)
            .unwrap()
            .aggregate(AggFunc::Min, &["date"], None)
            .unwrap();
        assert_eq!(q.aggregations.funcs.len(), 2);
        assert!(Query::default().aggregate(AggFunc::Sum, &["nope"], None).is_err());
        assert!(Query::default()
            .aggregate(AggFunc::Sum, &["amountEur"], Some("year"))
            .is_ok());
    }

    #[test]
    fn test_matches_and_apply_iter() {
        let mut a = Entity::new("a", "Person");
        a.add("name", "Alice");
        a.add("country", "de");
        a.datasets.insert("d1".to_string());
        let mut b = Entity::new("b", "Person");
        b.add("name", "Bob");
        b.datasets.insert("d2".to_string());

        let q = Query::default().filter("dataset", "d1").unwrap();
        assert!(q.matches(&a));
        assert!(!q.matches(&b));

        let q = Query::default().order_by(&["name"], false);
        let res = q.apply_iter(vec![a.clone(), b.clone()]);
        assert_eq!(res[0].id, "b");

        let q = Query::default().order_by(&["name"], true).slice(0, Some(1)).unwrap();
        let res = q.apply_iter(vec![b, a]);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].id, "a");
    }

    #[test]
    fn test_sort_numeric_vs_lexicographic() {
        let mut small = Entity::new("small", "Payment");
        small.add("amountEur", "900");
        let mut big = Entity::new("big", "Payment");
        big.add("amountEur", "50001");

        let q = Query::default().order_by(&["amountEur"], true);
        let res = q.apply_iter(vec![big.clone(), small.clone()]);
        // numeric, so 900 precedes 50001 despite "9" > "5"
        assert_eq!(res[0].id, "small");

        let q = Query::default().order_by(&["amountEur"], false);
        let res = q.apply_iter(vec![small, big]);
        assert_eq!(res[0].id, "big");
    }

    #[test]
    fn test_sort_missing_values_last() {
        let mut named = Entity::new("n", "Person");
        named.add("name", "Zed");
        let anon = Entity::new("anon", "Person");

        let q = Query::default().order_by(&["name"], true);
        let res = q.apply_iter(vec![anon.clone(), named.clone()]);
        assert_eq!(res[1].id, "anon");
        let q = Query::default().order_by(&["name"], false);
        let res = q.apply_iter(vec![anon, named]);
        assert_eq!(res[1].id, "anon");
    }

    #[test]
    fn test_reverse_adjacency() {
        let mut payment = Entity::new("pay-1", "Payment");
        payment.add("beneficiary", "org-1");
        payment.add("amountEur", "10");
        let mut other = Entity::new("pay-2", "Payment");
        other.add("beneficiary", "org-2");

        let q = Query::default().with_reverse("org-1");
        assert!(q.matches(&payment));
        assert!(!q.matches(&other));

        // reverse combined with a schema clause
        let q = Query::default()
            .with_reverse("org-1")
            .filter("schema", "Person")
            .unwrap();
        assert!(!q.matches(&payment));
    }
}
