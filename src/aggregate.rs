//! The streaming aggregation engine.
//!
//! Aggregations run over the filtered-but-unpaginated result set of a
//! query. The engine is single-pass: entities are fed one at a time and
//! accumulators hold only running state. Per-value numeric coercion
//! failures are skipped, never fatal to the whole aggregation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::entity::Entity;
use crate::error::ValidationError;
use crate::schema::SchemaRegistry;
use crate::util::get_year_from_iso;

/// Aggregation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum AggFunc {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggFunc {
    /// Parses a wire function name.
    pub fn parse(name: &str) -> Result<Self, ValidationError> {
        match name {
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            other => Err(ValidationError::UnknownAggFunc {
                func: other.to_string(),
            }),
        }
    }

    /// The wire name of the function.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AggFunc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Composite aggregation spec accumulated from `aggregate()` calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationSpec {
    /// Function mapped to its target properties.
    pub funcs: BTreeMap<AggFunc, BTreeSet<String>>,
    /// Group property mapped to the functions bucketed under it.
    pub groups: BTreeMap<String, BTreeMap<AggFunc, BTreeSet<String>>>,
}

impl AggregationSpec {
    /// Returns true if no aggregations were requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty() && self.groups.is_empty()
    }

    /// Adds targets for a function, optionally bucketed by a group
    /// property. Grouped aggregations also accumulate ungrouped totals.
    pub fn add(&mut self, func: AggFunc, targets: &[&str], group: Option<&str>) {
        let entry = self.funcs.entry(func).or_default();
        for target in targets {
            entry.insert((*target).to_string());
        }
        if let Some(group) = group {
            let bucket = self
                .groups
                .entry(group.to_string())
                .or_default()
                .entry(func)
                .or_default();
            for target in targets {
                bucket.insert((*target).to_string());
            }
        }
    }
}

/// One aggregated value: numeric for sum/avg/count and numeric min/max,
/// textual for lexicographic min/max (dates, strings).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum AggValue {
    Num(f64),
    Text(String),
}

#[derive(Debug, Clone)]
enum Accumulator {
    Sum(f64),
    Avg { sum: f64, count: u64 },
    MinNum(Option<f64>),
    MaxNum(Option<f64>),
    MinText(Option<String>),
    MaxText(Option<String>),
    Count(u64),
}

impl Accumulator {
    fn new(func: AggFunc, numeric: bool) -> Self {
        match (func, numeric) {
            (AggFunc::Sum, _) => Self::Sum(0.0),
            (AggFunc::Avg, _) => Self::Avg { sum: 0.0, count: 0 },
            (AggFunc::Min, true) => Self::MinNum(None),
            (AggFunc::Max, true) => Self::MaxNum(None),
            (AggFunc::Min, false) => Self::MinText(None),
            (AggFunc::Max, false) => Self::MaxText(None),
            (AggFunc::Count, _) => Self::Count(0),
        }
    }

    fn feed(&mut self, value: &str) {
        match self {
            Self::Sum(total) => {
                if let Ok(num) = value.trim().parse::<f64>() {
                    *total += num;
                }
            }
            Self::Avg { sum, count } => {
                if let Ok(num) = value.trim().parse::<f64>() {
                    *sum += num;
                    *count += 1;
                }
            }
            Self::MinNum(min) => {
                if let Ok(num) = value.trim().parse::<f64>() {
                    *min = Some(min.map_or(num, |m| m.min(num)));
                }
            }
            Self::MaxNum(max) => {
                if let Ok(num) = value.trim().parse::<f64>() {
                    *max = Some(max.map_or(num, |m| m.max(num)));
                }
            }
            Self::MinText(min) => {
                if min.as_deref().map_or(true, |m| value < m) {
                    *min = Some(value.to_string());
                }
            }
            Self::MaxText(max) => {
                if max.as_deref().map_or(true, |m| value > m) {
                    *max = Some(value.to_string());
                }
            }
            Self::Count(count) => *count += 1,
        }
    }

    fn finish(self) -> Option<AggValue> {
        match self {
            Self::Sum(total) => Some(AggValue::Num(total)),
            Self::Avg { sum, count } => {
                #[allow(clippy::cast_precision_loss)]
                if count == 0 {
                    None
                } else {
                    Some(AggValue::Num(sum / count as f64))
                }
            }
            Self::MinNum(v) | Self::MaxNum(v) => v.map(AggValue::Num),
            Self::MinText(v) | Self::MaxText(v) => v.map(AggValue::Text),
            Self::Count(count) => {
                #[allow(clippy::cast_precision_loss)]
                Some(AggValue::Num(count as f64))
            }
        }
    }
}

/// Final aggregation snapshot, shaped like its wire form:
/// `{func: {target: value}}` plus
/// `{"groups": {group: {func: {target: {key: value}}}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct AggregationResult {
    /// Ungrouped values, function mapped to target values.
    #[serde(flatten)]
    pub results: BTreeMap<AggFunc, BTreeMap<String, AggValue>>,
    /// Grouped values, keyed group, then function, target and group key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, BTreeMap<AggFunc, BTreeMap<String, BTreeMap<String, AggValue>>>>,
}

impl AggregationResult {
    /// One top-level aggregated value.
    #[must_use]
    pub fn get(&self, func: AggFunc, target: &str) -> Option<&AggValue> {
        self.results.get(&func)?.get(target)
    }

    /// One grouped aggregated value.
    #[must_use]
    pub fn get_grouped(
        &self,
        group: &str,
        func: AggFunc,
        target: &str,
        key: &str,
    ) -> Option<&AggValue> {
        self.groups.get(group)?.get(&func)?.get(target)?.get(key)
    }
}

/// Streaming evaluator for an [`AggregationSpec`].
pub struct Aggregator {
    registry: Arc<SchemaRegistry>,
    spec: AggregationSpec,
    totals: BTreeMap<(AggFunc, String), Accumulator>,
    grouped: BTreeMap<(String, String, AggFunc, String), Accumulator>,
}

impl Aggregator {
    /// Builds accumulators for every (function, target) pair in the spec.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>, spec: AggregationSpec) -> Self {
        let mut totals = BTreeMap::new();
        for (func, targets) in &spec.funcs {
            for target in targets {
                let numeric = target_is_numeric(&registry, target);
                totals.insert((*func, target.clone()), Accumulator::new(*func, numeric));
            }
        }
        Self {
            registry,
            spec,
            totals,
            grouped: BTreeMap::new(),
        }
    }

    /// Feeds one entity into all accumulators.
    pub fn collect(&mut self, entity: &Entity) {
        for ((_, target), acc) in &mut self.totals {
            for value in target_values(entity, target) {
                acc.feed(&value);
            }
        }
        for (group, funcs) in &self.spec.groups {
            let keys = group_keys(entity, group);
            for key in keys {
                for (func, targets) in funcs {
                    for target in targets {
                        let numeric = target_is_numeric(&self.registry, target);
                        let acc = self
                            .grouped
                            .entry((group.clone(), key.clone(), *func, target.clone()))
                            .or_insert_with(|| Accumulator::new(*func, numeric));
                        for value in target_values(entity, target) {
                            acc.feed(&value);
                        }
                    }
                }
            }
        }
    }

    /// Finalizes all accumulators into the result snapshot.
    #[must_use]
    pub fn finish(self) -> AggregationResult {
        let mut result = AggregationResult::default();
        for ((func, target), acc) in self.totals {
            if let Some(value) = acc.finish() {
                result.results.entry(func).or_default().insert(target, value);
            }
        }
        for ((group, key, func, target), acc) in self.grouped {
            if let Some(value) = acc.finish() {
                result
                    .groups
                    .entry(group)
                    .or_default()
                    .entry(func)
                    .or_default()
                    .entry(target)
                    .or_default()
                    .insert(key, value);
            }
        }
        result
    }
}

fn target_is_numeric(registry: &SchemaRegistry, target: &str) -> bool {
    registry
        .find_property(target)
        .is_some_and(|spec| spec.ptype.is_numeric())
}

/// Values of an aggregation target on one entity. The pseudo-target `id`
/// yields the canonical id, so `count` over `id` counts entities.
fn target_values(entity: &Entity, target: &str) -> Vec<String> {
    if target == "id" {
        return vec![entity.id.clone()];
    }
    entity.get(target).to_vec()
}

/// Group keys of one entity. The pseudo-property `year` derives from the
/// years of `date` values, falling back to `startDate`.
fn group_keys(entity: &Entity, group: &str) -> Vec<String> {
    if group == "year" {
        let mut dates = entity.get("date");
        if dates.is_empty() {
            dates = entity.get("startDate");
        }
        let mut years: Vec<String> = dates
            .iter()
            .filter_map(|d| get_year_from_iso(d))
            .map(|y| y.to_string())
            .collect();
        years.dedup();
        return years;
    }
    entity.get(group).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(id: &str, amount: &str, beneficiary: &str, date: &str) -> Entity {
        let mut e = Entity::new(id, "Payment");
        e.add("amountEur", amount);
        e.add("beneficiary", beneficiary);
        e.add("date", date);
        e
    }

    fn spec(func: AggFunc, targets: &[&str], group: Option<&str>) -> AggregationSpec {
        let mut spec = AggregationSpec::default();
        spec.add(func, targets, group);
        spec
    }

    #[test]
    fn test_agg_func_parse() {
        assert_eq!(AggFunc::parse("sum").unwrap(), AggFunc::Sum);
        assert!(AggFunc::parse("median").is_err());
    }

    #[test]
    fn test_sum_and_avg() {
        let registry = SchemaRegistry::builtin();
        let mut agg = Aggregator::new(registry.clone(), {
            let mut s = spec(AggFunc::Sum, &["amountEur"], None);
            s.add(AggFunc::Avg, &["amountEur"], None);
            s
        });
        agg.collect(&payment("p1", "100", "b1", "2007-01-01"));
        agg.collect(&payment("p2", "200.5", "b1", "2008-01-01"));
        let result = agg.finish();
        assert_eq!(result.get(AggFunc::Sum, "amountEur"), Some(&AggValue::Num(300.5)));
        assert_eq!(result.get(AggFunc::Avg, "amountEur"), Some(&AggValue::Num(150.25)));
    }

    #[test]
    fn test_coercion_failure_skipped() {
        let registry = SchemaRegistry::builtin();
        let mut agg = Aggregator::new(registry, spec(AggFunc::Sum, &["amountEur"], None));
        agg.collect(&payment("p1", "100", "b1", "2007"));
        agg.collect(&payment("p2", "not-a-number", "b1", "2007"));
        let result = agg.finish();
        // the bad value is dropped, the aggregation survives
        assert_eq!(result.get(AggFunc::Sum, "amountEur"), Some(&AggValue::Num(100.0)));
    }

    #[test]
    fn test_min_max_dates_are_textual() {
        let registry = SchemaRegistry::builtin();
        let mut s = spec(AggFunc::Min, &["date"], None);
        s.add(AggFunc::Max, &["date"], None);
        let mut agg = Aggregator::new(registry, s);
        agg.collect(&payment("p1", "1", "b1", "2002-07-04"));
        agg.collect(&payment("p2", "1", "b1", "2011-12-29"));
        let result = agg.finish();
        assert_eq!(
            result.get(AggFunc::Min, "date"),
            Some(&AggValue::Text("2002-07-04".to_string()))
        );
        assert_eq!(
            result.get(AggFunc::Max, "date"),
            Some(&AggValue::Text("2011-12-29".to_string()))
        );
    }

    #[test]
    fn test_count_over_id_counts_entities() {
        let registry = SchemaRegistry::builtin();
        let mut agg = Aggregator::new(registry, spec(AggFunc::Count, &["id"], None));
        agg.collect(&payment("p1", "1", "b1", "2007"));
        agg.collect(&payment("p2", "1", "b1", "2007"));
        agg.collect(&payment("p3", "1", "b1", "2007"));
        assert_eq!(agg.finish().get(AggFunc::Count, "id"), Some(&AggValue::Num(3.0)));
    }

    #[test]
    fn test_grouped_sum_totals_match() {
        let registry = SchemaRegistry::builtin();
        let mut agg = Aggregator::new(
            registry,
            spec(AggFunc::Sum, &["amountEur"], Some("beneficiary")),
        );
        agg.collect(&payment("p1", "100", "b1", "2007"));
        agg.collect(&payment("p2", "50", "b2", "2007"));
        agg.collect(&payment("p3", "25", "b1", "2007"));
        let result = agg.finish();
        assert_eq!(result.get(AggFunc::Sum, "amountEur"), Some(&AggValue::Num(175.0)));
        assert_eq!(
            result.get_grouped("beneficiary", AggFunc::Sum, "amountEur", "b1"),
            Some(&AggValue::Num(125.0))
        );
        assert_eq!(
            result.get_grouped("beneficiary", AggFunc::Sum, "amountEur", "b2"),
            Some(&AggValue::Num(50.0))
        );
    }

    #[test]
    fn test_grouped_by_year() {
        let registry = SchemaRegistry::builtin();
        let mut agg = Aggregator::new(registry, spec(AggFunc::Sum, &["amountEur"], Some("year")));
        agg.collect(&payment("p1", "10", "b1", "2007-03-01"));
        agg.collect(&payment("p2", "20", "b1", "2007-09-01"));
        agg.collect(&payment("p3", "40", "b1", "2008-01-01"));
        let result = agg.finish();
        assert_eq!(
            result.get_grouped("year", AggFunc::Sum, "amountEur", "2007"),
            Some(&AggValue::Num(30.0))
        );
        assert_eq!(
            result.get_grouped("year", AggFunc::Sum, "amountEur", "2008"),
            Some(&AggValue::Num(40.0))
        );
    }

    #[test]
    fn test_result_serialization_shape() {
        let registry = SchemaRegistry::builtin();
        let mut agg = Aggregator::new(
            registry,
            spec(AggFunc::Sum, &["amountEur"], Some("beneficiary")),
        );
        agg.collect(&payment("p1", "100", "b1", "2007"));
        let value = serde_json::to_value(agg.finish()).unwrap();
        assert_eq!(value["sum"]["amountEur"], 100.0);
        assert_eq!(value["groups"]["beneficiary"]["sum"]["amountEur"]["b1"], 100.0);
    }
}
