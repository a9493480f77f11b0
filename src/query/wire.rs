//! Wire form of a query.
//!
//! A query serializes to a flat string-keyed map and parses back from one.
//! The mapping is bijective for well-formed queries: `to_map` then
//! `from_map` reproduces the query exactly.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::aggregate::AggFunc;
use crate::error::ValidationError;
use crate::query::{FilterValue, Query};
use crate::schema::SchemaRegistry;

impl Query {
    /// Serializes the query to its wire map.
    ///
    /// Filter clauses appear under their `field` or `field__comparator`
    /// keys, with sets as sorted arrays. Sorts fold into `order_by` with a
    /// `-` prefix for descending fields. Schema modifier flags are emitted
    /// only when set.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for clause in self.filters.values() {
            let value = match &clause.value {
                FilterValue::One(v) => Value::String(v.clone()),
                FilterValue::Many(set) => {
                    Value::Array(set.iter().map(|v| Value::String(v.clone())).collect())
                }
                FilterValue::Flag(flag) => Value::Bool(*flag),
            };
            map.insert(clause.wire_key(), value);
        }
        if self.include_descendants {
            map.insert("schema_include_descendants".to_string(), Value::Bool(true));
        }
        if self.include_matchable {
            map.insert("schema_include_matchable".to_string(), Value::Bool(true));
        }
        if let Some(reverse) = &self.reverse {
            map.insert("reverse".to_string(), Value::String(reverse.clone()));
        }
        if !self.sorts.is_empty() {
            let fields: Vec<Value> = self
                .sorts
                .iter()
                .map(|s| {
                    if s.ascending {
                        Value::String(s.field.clone())
                    } else {
                        Value::String(format!("-{}", s.field))
                    }
                })
                .collect();
            map.insert("order_by".to_string(), Value::Array(fields));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".to_string(), json!(limit));
        }
        if self.offset > 0 {
            map.insert("offset".to_string(), json!(self.offset));
        }
        if !self.aggregations.is_empty() {
            let mut aggs = Map::new();
            for (func, targets) in &self.aggregations.funcs {
                aggs.insert(
                    func.as_str().to_string(),
                    Value::Array(targets.iter().map(|t| Value::String(t.clone())).collect()),
                );
            }
            if !self.aggregations.groups.is_empty() {
                let mut groups = Map::new();
                for (group, funcs) in &self.aggregations.groups {
                    let mut inner = Map::new();
                    for (func, targets) in funcs {
                        inner.insert(
                            func.as_str().to_string(),
                            Value::Array(
                                targets.iter().map(|t| Value::String(t.clone())).collect(),
                            ),
                        );
                    }
                    groups.insert(group.clone(), Value::Object(inner));
                }
                aggs.insert("groups".to_string(), Value::Object(groups));
            }
            map.insert("aggregations".to_string(), Value::Object(aggs));
        }
        map
    }

    /// Parses a wire map back into a query bound to the given registry.
    ///
    /// Unknown keys, malformed values and invalid clauses are all rejected.
    pub fn from_map(
        registry: Arc<SchemaRegistry>,
        map: &Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        let mut query = Self::new(registry);
        for (key, value) in map {
            match key.as_str() {
                "order_by" => {
                    let fields = value.as_array().ok_or_else(|| malformed("order_by"))?;
                    for field in fields {
                        let field = field.as_str().ok_or_else(|| malformed("order_by"))?;
                        query = match field.strip_prefix('-') {
                            Some(name) => query.order_by(&[name], false),
                            None => query.order_by(&[field], true),
                        };
                    }
                }
                "limit" => {
                    let limit = value.as_u64().ok_or_else(|| malformed("limit"))?;
                    query = query.with_limit(usize::try_from(limit).map_err(|_| malformed("limit"))?);
                }
                "offset" => {
                    let offset = value.as_u64().ok_or_else(|| malformed("offset"))?;
                    query =
                        query.with_offset(usize::try_from(offset).map_err(|_| malformed("offset"))?);
                }
                "aggregations" => {
                    query = parse_aggregations(query, value)?;
                }
                _ => {
                    let value = wire_value(key, value)?;
                    query = query.filter(key, value)?;
                }
            }
        }
        Ok(query)
    }
}

fn wire_value(key: &str, value: &Value) -> Result<FilterValue, ValidationError> {
    match value {
        Value::String(s) => Ok(FilterValue::One(s.clone())),
        Value::Bool(flag) => Ok(FilterValue::Flag(*flag)),
        Value::Number(n) => Ok(FilterValue::One(n.to_string())),
        Value::Array(items) => {
            let mut set = std::collections::BTreeSet::new();
            for item in items {
                match item {
                    Value::String(s) => set.insert(s.clone()),
                    Value::Number(n) => set.insert(n.to_string()),
                    _ => return Err(malformed(key)),
                };
            }
            Ok(FilterValue::Many(set))
        }
        _ => Err(malformed(key)),
    }
}

fn parse_aggregations(mut query: Query, value: &Value) -> Result<Query, ValidationError> {
    let aggs = value.as_object().ok_or_else(|| malformed("aggregations"))?;
    for (name, targets) in aggs {
        if name == "groups" {
            let groups = targets.as_object().ok_or_else(|| malformed("aggregations"))?;
            for (group, funcs) in groups {
                let funcs = funcs.as_object().ok_or_else(|| malformed("aggregations"))?;
                for (func, targets) in funcs {
                    let func = AggFunc::parse(func)?;
                    let targets = target_list(targets)?;
                    let refs: Vec<&str> = targets.iter().map(String::as_str).collect();
                    query = query.aggregate(func, &refs, Some(group))?;
                }
            }
        } else {
            let func = AggFunc::parse(name)?;
            let targets = target_list(targets)?;
            let refs: Vec<&str> = targets.iter().map(String::as_str).collect();
            query = query.aggregate(func, &refs, None)?;
        }
    }
    Ok(query)
}

fn target_list(value: &Value) -> Result<Vec<String>, ValidationError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed("aggregations"))
            })
            .collect(),
        _ => Err(malformed("aggregations")),
    }
}

fn malformed(key: &str) -> ValidationError {
    ValidationError::MalformedMap {
        reason: format!("bad value for `{key}`"),
    }
}
