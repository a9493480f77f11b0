//! The streaming stats collector.
//!
//! The [`Collector`] consumes assembled entities one at a time and keeps
//! only counters, so memory is bounded by the number of distinct schema and
//! country values, never by the dataset size.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::entity::Entity;
use crate::schema::{PropertyType, SchemaRegistry};
use crate::util::{clean_country, clean_string, get_year_from_iso};

/// Count of one schema, enriched with its display label and plural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaCount {
    /// Schema name.
    pub name: String,
    /// Display label from the registry.
    pub label: String,
    /// Plural display label from the registry.
    pub plural: String,
    /// Entities carrying this schema.
    pub count: u64,
}

/// Count of one country code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryCount {
    /// Lowercase country code.
    pub code: String,
    /// Entities referencing this country.
    pub count: u64,
}

/// Per-category breakdown: non-interval "things" or interval schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    /// Entities counted into this category.
    pub count: u64,
    /// Schema breakdown, sorted by name.
    pub schemata: Vec<SchemaCount>,
    /// Country breakdown, sorted by code.
    pub countries: Vec<CountryCount>,
}

/// Snapshot of a collected entity stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetStats {
    /// Entities seen by the collector.
    pub entity_count: u64,
    /// Earliest date value seen across Date-typed properties, ISO 8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Latest date value seen, ISO 8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Year range of `start`..`end`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub years: Option<(i32, i32)>,
    /// Breakdown of non-interval schemas.
    pub things: CategoryStats,
    /// Breakdown of interval schemas.
    pub intervals: CategoryStats,
}

#[derive(Debug, Default)]
struct CategoryCounters {
    count: u64,
    schemata: BTreeMap<String, u64>,
    countries: BTreeMap<String, u64>,
}

/// Single-pass entity stream statistics.
///
/// # Examples
///
/// ```
/// use entiq::{Collector, Entity, SchemaRegistry};
///
/// let mut collector = Collector::new(SchemaRegistry::builtin());
/// let mut person = Entity::new("p-1", "Person");
/// person.add("country", "de");
/// collector.collect(&person);
/// let stats = collector.finish();
/// assert_eq!(stats.entity_count, 1);
/// assert_eq!(stats.things.countries[0].code, "de");
/// ```
#[derive(Debug)]
pub struct Collector {
    registry: Arc<SchemaRegistry>,
    entity_count: u64,
    start: Option<String>,
    end: Option<String>,
    things: CategoryCounters,
    intervals: CategoryCounters,
}

impl Collector {
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            entity_count: 0,
            start: None,
            end: None,
            things: CategoryCounters::default(),
            intervals: CategoryCounters::default(),
        }
    }

    /// Feeds one entity into the counters.
    pub fn collect(&mut self, entity: &Entity) {
        self.entity_count += 1;
        let interval = self.registry.is_interval(&entity.schema);
        let bucket = if interval {
            &mut self.intervals
        } else {
            &mut self.things
        };
        bucket.count += 1;
        *bucket.schemata.entry(entity.schema.clone()).or_default() += 1;

        for (prop, values) in &entity.properties {
            let ptype = self
                .registry
                .property(&entity.schema, prop)
                .or_else(|| self.registry.find_property(prop))
                .map(|spec| spec.ptype);
            match ptype {
                Some(PropertyType::Country) => {
                    for value in values {
                        if let Some(code) = clean_country(value) {
                            *bucket.countries.entry(code).or_default() += 1;
                        }
                    }
                }
                Some(PropertyType::Date) => {
                    for value in values {
                        if let Some(date) = parse_date_lenient(value) {
                            if self.start.as_deref().map_or(true, |s| date.as_str() < s) {
                                self.start = Some(date.clone());
                            }
                            if self.end.as_deref().map_or(true, |e| date.as_str() > e) {
                                self.end = Some(date);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Finalizes the counters into a stats snapshot.
    #[must_use]
    pub fn finish(self) -> DatasetStats {
        let years = match (
            self.start.as_deref().and_then(get_year_from_iso),
            self.end.as_deref().and_then(get_year_from_iso),
        ) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        };
        DatasetStats {
            entity_count: self.entity_count,
            start: self.start,
            end: self.end,
            years,
            things: finish_category(&self.registry, self.things),
            intervals: finish_category(&self.registry, self.intervals),
        }
    }

    /// Wraps an entity stream into a pass-through iterator that counts
    /// everything that flows through it.
    #[must_use]
    pub fn apply<I>(self, entities: I) -> StatsIter<I> {
        StatsIter {
            collector: self,
            inner: entities,
        }
    }
}

fn finish_category(registry: &SchemaRegistry, counters: CategoryCounters) -> CategoryStats {
    let schemata = counters
        .schemata
        .into_iter()
        .map(|(name, count)| {
            let (label, plural) = registry
                .get(&name)
                .map_or((name.clone(), name.clone()), |spec| {
                    (spec.label.clone(), spec.plural.clone())
                });
            SchemaCount {
                name,
                label,
                plural,
                count,
            }
        })
        .collect();
    let countries = counters
        .countries
        .into_iter()
        .map(|(code, count)| CountryCount { code, count })
        .collect();
    CategoryStats {
        count: counters.count,
        schemata,
        countries,
    }
}

/// Pass-through iterator produced by [`Collector::apply`].
pub struct StatsIter<I> {
    collector: Collector,
    inner: I,
}

impl<I> StatsIter<I> {
    /// Consumes the wrapper and returns the stats collected so far.
    #[must_use]
    pub fn into_stats(self) -> DatasetStats {
        self.collector.finish()
    }
}

impl<I: Iterator<Item = Entity>> Iterator for StatsIter<I> {
    type Item = Entity;

    fn next(&mut self) -> Option<Self::Item> {
        let entity = self.inner.next()?;
        self.collector.collect(&entity);
        Some(entity)
    }
}

/// Validates a date value leniently: full date-time, date, year-month or
/// bare year all pass; anything else is ignored for interval tracking.
fn parse_date_lenient(value: &str) -> Option<String> {
    let cleaned = clean_string(value)?;
    if cleaned.len() >= 10 {
        let head = cleaned.get(..10)?;
        NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()?;
        return Some(cleaned);
    }
    if cleaned.len() == 7 {
        NaiveDate::parse_from_str(&format!("{cleaned}-01"), "%Y-%m-%d").ok()?;
        return Some(cleaned);
    }
    if cleaned.len() == 4 && cleaned.parse::<u16>().is_ok() {
        return Some(cleaned);
    }
    None
}
