//! Filter clauses.
//!
//! A clause is keyed by (field, comparator). Validation happens eagerly at
//! construction against the schema registry, so a malformed clause never
//! reaches a backend.

use std::collections::BTreeSet;
use std::fmt;

use regex::RegexBuilder;

use crate::entity::Entity;
use crate::error::ValidationError;
use crate::schema::SchemaRegistry;

/// Comparator suffix of a filter key (`field__comparator`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Comparator {
    /// Exact match (the default when no suffix is given).
    Eq,
    /// Membership in a value set.
    In,
    /// Lexicographic greater-or-equal.
    Gte,
    /// Lexicographic less-or-equal.
    Lte,
    /// Lexicographic strictly-greater.
    Gt,
    /// Lexicographic strictly-less.
    Lt,
    /// Prefix match.
    Startswith,
    /// Case-insensitive SQL-LIKE pattern (`%` and `_` wildcards).
    Ilike,
    /// Presence test: `true` matches absent, `false` matches present.
    Null,
}

impl Comparator {
    /// Parses a comparator suffix.
    pub fn parse(suffix: &str) -> Result<Self, ValidationError> {
        match suffix {
            "eq" => Ok(Self::Eq),
            "in" => Ok(Self::In),
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            "gt" => Ok(Self::Gt),
            "lt" => Ok(Self::Lt),
            "startswith" => Ok(Self::Startswith),
            "ilike" => Ok(Self::Ilike),
            "null" => Ok(Self::Null),
            other => Err(ValidationError::UnknownComparator {
                comparator: other.to_string(),
            }),
        }
    }

    /// The wire suffix for this comparator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::In => "in",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Startswith => "startswith",
            Self::Ilike => "ilike",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The field a clause constrains.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    /// Contributing dataset names.
    Dataset,
    /// Resolved schema name.
    Schema,
    /// Raw (pre-resolution) entity ids.
    EntityId,
    /// The canonical id.
    CanonicalId,
    /// Contributing origin tags.
    Origin,
    /// Any entity property known to the registry.
    Property(String),
}

impl Field {
    /// Resolves a field name, validating property names against the registry.
    pub fn parse(name: &str, registry: &SchemaRegistry) -> Result<Self, ValidationError> {
        match name {
            "dataset" => Ok(Self::Dataset),
            "schema" => Ok(Self::Schema),
            "entity_id" => Ok(Self::EntityId),
            "canonical_id" => Ok(Self::CanonicalId),
            "origin" => Ok(Self::Origin),
            prop => {
                if registry.find_property(prop).is_some() {
                    Ok(Self::Property(prop.to_string()))
                } else {
                    Err(ValidationError::UnknownField {
                        field: prop.to_string(),
                    })
                }
            }
        }
    }

    /// The wire name of the field.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Dataset => "dataset",
            Self::Schema => "schema",
            Self::EntityId => "entity_id",
            Self::CanonicalId => "canonical_id",
            Self::Origin => "origin",
            Self::Property(name) => name,
        }
    }
}

/// A clause value: one scalar, a set, or a flag (for presence tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// A single scalar value.
    One(String),
    /// A set of values.
    Many(BTreeSet<String>),
    /// A boolean, used by the `null` comparator and modifier keys.
    Flag(bool),
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::One(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::One(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::One(v.to_string())
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(v: Vec<String>) -> Self {
        Self::Many(v.into_iter().collect())
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(v: Vec<&str>) -> Self {
        Self::Many(v.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for FilterValue {
    fn from(v: &[&str]) -> Self {
        Self::Many(v.iter().map(|s| (*s).to_string()).collect())
    }
}

/// One validated filter clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// The constrained field.
    pub field: Field,
    /// How the value is compared.
    pub comparator: Comparator,
    /// The comparison value, coerced to the comparator's shape.
    pub value: FilterValue,
}

impl Filter {
    /// Builds a clause, coercing and validating the value shape for the
    /// comparator.
    pub fn new(
        field: Field,
        comparator: Comparator,
        value: FilterValue,
    ) -> Result<Self, ValidationError> {
        let value = match (comparator, value) {
            // `in` coerces a scalar into a one-element set
            (Comparator::In, FilterValue::One(v)) => {
                FilterValue::Many(std::iter::once(v).collect())
            }
            (Comparator::In, FilterValue::Many(v)) => FilterValue::Many(v),
            (Comparator::In, FilterValue::Flag(_)) => return Err(ValidationError::SetExpected),
            (Comparator::Null, FilterValue::Flag(flag)) => FilterValue::Flag(flag),
            (Comparator::Null, FilterValue::One(v)) => match v.as_str() {
                "true" => FilterValue::Flag(true),
                "false" => FilterValue::Flag(false),
                other => {
                    return Err(ValidationError::InvalidValue {
                        field: field.name().to_string(),
                        reason: format!("presence test expects a boolean, got `{other}`"),
                    })
                }
            },
            (Comparator::Null, FilterValue::Many(_)) => {
                return Err(ValidationError::ScalarExpected {
                    comparator: Comparator::Null.as_str().to_string(),
                })
            }
            (cmp, FilterValue::Many(_)) => {
                return Err(ValidationError::ScalarExpected {
                    comparator: cmp.as_str().to_string(),
                })
            }
            (_, FilterValue::Flag(_)) => {
                return Err(ValidationError::InvalidValue {
                    field: field.name().to_string(),
                    reason: "expected a string value, got a boolean".to_string(),
                })
            }
            (_, FilterValue::One(v)) => FilterValue::One(v),
        };
        Ok(Self {
            field,
            comparator,
            value,
        })
    }

    /// The clause identity: setting the same (field, comparator) again
    /// replaces the prior value.
    #[must_use]
    pub fn key(&self) -> (Field, Comparator) {
        (self.field.clone(), self.comparator)
    }

    /// The wire key, `field` or `field__comparator`.
    #[must_use]
    pub fn wire_key(&self) -> String {
        if self.comparator == Comparator::Eq {
            self.field.name().to_string()
        } else {
            format!("{}__{}", self.field.name(), self.comparator)
        }
    }

    fn candidates<'e>(&self, entity: &'e Entity) -> Vec<&'e str> {
        match &self.field {
            Field::Dataset => entity.datasets.iter().map(String::as_str).collect(),
            Field::Schema => vec![entity.schema.as_str()],
            Field::EntityId => entity.referents.iter().map(String::as_str).collect(),
            Field::CanonicalId => vec![entity.id.as_str()],
            Field::Origin => entity.origins.iter().map(String::as_str).collect(),
            Field::Property(prop) => entity.get(prop).iter().map(String::as_str).collect(),
        }
    }

    fn numeric(&self, registry: &SchemaRegistry) -> bool {
        match &self.field {
            Field::Property(prop) => registry
                .find_property(prop)
                .is_some_and(|spec| spec.ptype.is_numeric()),
            _ => false,
        }
    }

    /// Evaluates the clause against an assembled entity.
    ///
    /// A clause over multi-valued fields matches when any value satisfies
    /// the comparator.
    #[must_use]
    pub fn matches(&self, entity: &Entity, registry: &SchemaRegistry) -> bool {
        let candidates = self.candidates(entity);
        match (&self.comparator, &self.value) {
            (Comparator::Null, FilterValue::Flag(absent)) => candidates.is_empty() == *absent,
            (Comparator::Eq, FilterValue::One(want)) => candidates.iter().any(|c| c == want),
            (Comparator::In, FilterValue::Many(set)) => {
                candidates.iter().any(|c| set.contains(*c))
            }
            (Comparator::Startswith, FilterValue::One(prefix)) => {
                candidates.iter().any(|c| c.starts_with(prefix.as_str()))
            }
            (Comparator::Ilike, FilterValue::One(pattern)) => {
                match like_regex(pattern) {
                    Some(re) => candidates.iter().any(|c| re.is_match(c)),
                    None => false,
                }
            }
            (cmp, FilterValue::One(want)) => {
                let numeric = self.numeric(registry);
                candidates.iter().any(|c| ordered_match(*cmp, c, want, numeric))
            }
            _ => false,
        }
    }
}

fn ordered_match(cmp: Comparator, candidate: &str, want: &str, numeric: bool) -> bool {
    use std::cmp::Ordering;
    let ordering = if numeric {
        match (candidate.trim().parse::<f64>(), want.trim().parse::<f64>()) {
            (Ok(a), Ok(b)) => a.partial_cmp(&b),
            _ => None,
        }
    } else {
        Some(candidate.cmp(want))
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match cmp {
        Comparator::Gte => ordering != Ordering::Less,
        Comparator::Lte => ordering != Ordering::Greater,
        Comparator::Gt => ordering == Ordering::Greater,
        Comparator::Lt => ordering == Ordering::Less,
        _ => false,
    }
}

/// Translates a SQL-LIKE pattern into an anchored case-insensitive regex.
fn like_regex(pattern: &str) -> Option<regex::Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    RegexBuilder::new(&expr).case_insensitive(true).build().ok()
}
