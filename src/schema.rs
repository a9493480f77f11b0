//! The entity-type registry.
//!
//! The registry is an external, read-only catalog of entity types: their
//! properties, value types, ancestor/descendant relations and "matchable"
//! peer groups. It is always passed explicitly; there is no module-global
//! registry state. A built-in default registry ships so the crate works
//! stand-alone, but callers may construct their own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SchemaConflict;

/// Value type of a property.
///
/// Property types drive comparator semantics (numeric vs lexicographic
/// ordering), aggregation coercion, adjacency queries (`Entity`-typed
/// properties) and the stats collector (`Country`/`Date`-typed properties).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    /// Plain short string.
    String,
    /// Long-form text.
    Text,
    /// A name used for display and fingerprinting.
    Name,
    /// Numeric value, ordered and aggregated numerically.
    Number,
    /// ISO 8601 date or date prefix.
    Date,
    /// Country code.
    Country,
    /// A reference to another entity.
    Entity,
    /// A URL.
    Url,
    /// Registration or reference number.
    Identifier,
}

impl PropertyType {
    /// Returns true if values of this type order numerically.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Number)
    }
}

/// One property of a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Property name.
    pub name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub ptype: PropertyType,
    /// Exclusive properties keep a single value under last-writer-wins
    /// during assembly instead of accumulating a value set.
    #[serde(default)]
    pub exclusive: bool,
}

impl PropertySpec {
    /// Creates a non-exclusive property.
    #[must_use]
    pub fn new(name: impl Into<String>, ptype: PropertyType) -> Self {
        Self {
            name: name.into(),
            ptype,
            exclusive: false,
        }
    }

    /// Marks the property exclusive (last-writer-wins).
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// One entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSpec {
    /// Schema name.
    pub name: String,
    /// Human-readable singular label.
    pub label: String,
    /// Human-readable plural label.
    pub plural: String,
    /// Direct parent schema names.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Whether the identity resolver considers this type for matching.
    #[serde(default)]
    pub matchable: bool,
    /// Interval schemas (payments, events) bucket separately in stats.
    #[serde(default)]
    pub interval: bool,
    /// Property chain to derive an entity caption from, in order.
    #[serde(default)]
    pub caption: Vec<String>,
    /// Own (non-inherited) properties.
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
}

impl SchemaSpec {
    /// Creates a parentless, non-matchable schema.
    #[must_use]
    pub fn new(name: impl Into<String>, label: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            plural: plural.into(),
            parents: Vec::new(),
            matchable: false,
            interval: false,
            caption: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Adds a direct parent.
    #[must_use]
    pub fn parent(mut self, name: impl Into<String>) -> Self {
        self.parents.push(name.into());
        self
    }

    /// Marks the schema matchable for identity resolution.
    #[must_use]
    pub fn matchable(mut self) -> Self {
        self.matchable = true;
        self
    }

    /// Buckets the schema into the interval stats category.
    #[must_use]
    pub fn interval(mut self) -> Self {
        self.interval = true;
        self
    }

    /// Sets the caption property chain.
    #[must_use]
    pub fn caption(mut self, props: &[&str]) -> Self {
        self.caption = props.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Adds a non-exclusive property.
    #[must_use]
    pub fn prop(mut self, name: &str, ptype: PropertyType) -> Self {
        self.properties.push(PropertySpec::new(name, ptype));
        self
    }

    /// Adds a fully specified property.
    #[must_use]
    pub fn prop_spec(mut self, spec: PropertySpec) -> Self {
        self.properties.push(spec);
        self
    }
}

/// Read-only catalog of entity types.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemata: BTreeMap<String, SchemaSpec>,
}

impl SchemaRegistry {
    /// Builds a registry from schema specs.
    #[must_use]
    pub fn new(specs: impl IntoIterator<Item = SchemaSpec>) -> Self {
        let schemata = specs.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self { schemata }
    }

    /// The built-in default registry, shaped after the FollowTheMoney core
    /// model: things, legal entities and interval types.
    #[must_use]
    pub fn builtin() -> Arc<Self> {
        use PropertyType as T;
        Arc::new(Self::new([
            SchemaSpec::new("Thing", "Thing", "Things")
                .caption(&["name"])
                .prop("name", T::Name)
                .prop("country", T::Country)
                .prop("keywords", T::String)
                .prop("description", T::Text)
                .prop("sourceUrl", T::Url)
                .prop("website", T::Url)
                .prop("addressEntity", T::Entity),
            SchemaSpec::new("LegalEntity", "Legal entity", "Legal entities")
                .parent("Thing")
                .matchable()
                .prop("legalForm", T::String)
                .prop("jurisdiction", T::Country)
                .prop("email", T::String)
                .prop("phone", T::String)
                .prop("weakAlias", T::Name)
                .prop("registrationNumber", T::Identifier)
                .prop("incorporationDate", T::Date),
            SchemaSpec::new("Person", "Person", "People")
                .parent("LegalEntity")
                .matchable()
                .prop("birthDate", T::Date)
                .prop("nationality", T::Country)
                .prop("position", T::String),
            SchemaSpec::new("Company", "Company", "Companies")
                .parent("LegalEntity")
                .matchable(),
            SchemaSpec::new("Organization", "Organization", "Organizations")
                .parent("LegalEntity")
                .matchable(),
            SchemaSpec::new("PublicBody", "Public body", "Public bodies")
                .parent("Organization")
                .matchable(),
            SchemaSpec::new("Address", "Address", "Addresses")
                .parent("Thing")
                .caption(&["full", "name"])
                .prop("full", T::String)
                .prop("city", T::String)
                .prop("postalCode", T::String),
            SchemaSpec::new("Asset", "Asset", "Assets")
                .parent("Thing")
                .prop("amount", T::Number)
                .prop("currency", T::String),
            SchemaSpec::new("Interval", "Interval", "Intervals")
                .interval()
                .prop("date", T::Date)
                .prop("startDate", T::Date)
                .prop("endDate", T::Date)
                .prop("summary", T::Text),
            SchemaSpec::new("Event", "Event", "Events")
                .parent("Interval")
                .parent("Thing")
                .interval()
                .caption(&["name"]),
            SchemaSpec::new("Payment", "Payment", "Payments")
                .parent("Interval")
                .interval()
                .prop("payer", T::Entity)
                .prop("beneficiary", T::Entity)
                .prop("amount", T::Number)
                .prop("amountEur", T::Number)
                .prop("currency", T::String)
                .prop("purpose", T::String),
        ]))
    }

    /// Looks up a schema by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SchemaSpec> {
        self.schemata.get(name)
    }

    /// Returns true if the schema name exists.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.schemata.contains_key(name)
    }

    /// All schema names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemata.keys().map(String::as_str)
    }

    /// All transitive ancestors of a schema, excluding the schema itself.
    #[must_use]
    pub fn ancestors(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<&str> = vec![name];
        while let Some(current) = stack.pop() {
            if let Some(spec) = self.schemata.get(current) {
                for parent in &spec.parents {
                    if out.insert(parent.clone()) {
                        stack.push(parent);
                    }
                }
            }
        }
        out
    }

    /// All descendants of a schema, including the schema itself.
    #[must_use]
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if !self.has(name) {
            return out;
        }
        for candidate in self.schemata.keys() {
            if candidate == name || self.ancestors(candidate).contains(name) {
                out.insert(candidate.clone());
            }
        }
        out
    }

    /// Matchable peer group of a schema: every matchable schema on its
    /// ancestor or descendant axis, including itself when matchable.
    ///
    /// This is the resolver's candidate space, distinct from plain subtype
    /// expansion.
    #[must_use]
    pub fn matchable_peers(&self, name: &str) -> BTreeSet<String> {
        let mut axis = self.descendants(name);
        axis.extend(self.ancestors(name));
        axis.insert(name.to_string());
        axis.retain(|s| self.get(s).is_some_and(|spec| spec.matchable));
        axis
    }

    /// Returns true if `name` is `ancestor` or one of its descendants.
    #[must_use]
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        name == ancestor || self.ancestors(name).contains(ancestor)
    }

    /// Returns true if the schema buckets into the "intervals" stats
    /// category rather than "things".
    #[must_use]
    pub fn is_interval(&self, name: &str) -> bool {
        self.get(name).is_some_and(|s| s.interval)
    }

    fn depth(&self, name: &str) -> usize {
        self.get(name)
            .map(|spec| {
                spec.parents
                    .iter()
                    .map(|p| self.depth(p) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// The deepest ancestor shared by both schemas, if any.
    #[must_use]
    pub fn common_ancestor(&self, a: &str, b: &str) -> Option<String> {
        let left = self.ancestors(a);
        let right = self.ancestors(b);
        left.intersection(&right)
            .max_by_key(|name| self.depth(name))
            .cloned()
    }

    /// Resolves the schema of an entity assembled from statements of schema
    /// `a` and `b`: the more specific schema when comparable, otherwise a
    /// [`SchemaConflict`].
    ///
    /// With `downgrade` set, incomparable schemas fall back to their deepest
    /// shared ancestor. This is lossy: the result is less specific than
    /// either input.
    pub fn join(&self, a: &str, b: &str, downgrade: bool) -> Result<String, SchemaConflict> {
        if a == b {
            return Ok(a.to_string());
        }
        if self.is_a(a, b) {
            return Ok(a.to_string());
        }
        if self.is_a(b, a) {
            return Ok(b.to_string());
        }
        if downgrade {
            if let Some(ancestor) = self.common_ancestor(a, b) {
                return Ok(ancestor);
            }
        }
        Err(SchemaConflict {
            left: a.to_string(),
            right: b.to_string(),
        })
    }

    /// Looks up a property on a schema, following inheritance.
    #[must_use]
    pub fn property(&self, schema: &str, prop: &str) -> Option<&PropertySpec> {
        let spec = self.get(schema)?;
        if let Some(found) = spec.properties.iter().find(|p| p.name == prop) {
            return Some(found);
        }
        for parent in &spec.parents {
            if let Some(found) = self.property(parent, prop) {
                return Some(found);
            }
        }
        None
    }

    /// Finds a property by name on any schema. Used to validate filter
    /// fields that are not bound to a schema clause.
    #[must_use]
    pub fn find_property(&self, prop: &str) -> Option<&PropertySpec> {
        self.schemata
            .values()
            .find_map(|s| s.properties.iter().find(|p| p.name == prop))
    }

    /// The caption property chain of a schema, following inheritance until
    /// a chain is declared.
    #[must_use]
    pub fn caption_chain(&self, schema: &str) -> Vec<String> {
        let Some(spec) = self.get(schema) else {
            return Vec::new();
        };
        if !spec.caption.is_empty() {
            return spec.caption.clone();
        }
        for parent in &spec.parents {
            let chain = self.caption_chain(parent);
            if !chain.is_empty() {
                return chain;
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> Arc<SchemaRegistry> {
        SchemaRegistry::builtin()
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let reg = reg();
        let anc = reg.ancestors("PublicBody");
        assert!(anc.contains("Organization"));
        assert!(anc.contains("LegalEntity"));
        assert!(anc.contains("Thing"));
        assert!(!anc.contains("PublicBody"));

        let desc = reg.descendants("LegalEntity");
        assert_eq!(
            desc,
            ["LegalEntity", "Person", "Company", "Organization", "PublicBody"]
                .iter()
                .map(|s| (*s).to_string())
                .collect()
        );
    }

    #[test]
    fn test_matchable_peers() {
        let reg = reg();
        // matchable ancestors and the schema itself, but not Thing
        assert_eq!(
            reg.matchable_peers("Person"),
            ["Person", "LegalEntity"]
                .iter()
                .map(|s| (*s).to_string())
                .collect()
        );
        // for LegalEntity the peer group equals its descendant set
        assert_eq!(reg.matchable_peers("LegalEntity"), reg.descendants("LegalEntity"));
    }

    #[test]
    fn test_join_comparable() {
        let reg = reg();
        assert_eq!(reg.join("Person", "Person", false).unwrap(), "Person");
        // subtype wins over ancestor, both ways
        assert_eq!(reg.join("Person", "LegalEntity", false).unwrap(), "Person");
        assert_eq!(reg.join("LegalEntity", "Person", false).unwrap(), "Person");
    }

    #[test]
    fn test_join_conflict_and_downgrade() {
        let reg = reg();
        let err = reg.join("Company", "Person", false).unwrap_err();
        assert_eq!(err.left, "Company");
        assert_eq!(err.right, "Person");
        // deepest shared ancestor, not Thing
        assert_eq!(reg.join("Company", "Person", true).unwrap(), "LegalEntity");
    }

    #[test]
    fn test_join_disjoint_roots() {
        let reg = reg();
        // Payment (under Interval) and Person (under Thing) share no ancestor
        assert!(reg.join("Payment", "Person", true).is_err());
    }

    #[test]
    fn test_property_inheritance() {
        let reg = reg();
        assert_eq!(reg.property("Person", "name").unwrap().ptype, PropertyType::Name);
        assert_eq!(
            reg.property("Person", "birthDate").unwrap().ptype,
            PropertyType::Date
        );
        assert!(reg.property("Payment", "name").is_none());
        assert!(reg.property("Payment", "amountEur").unwrap().ptype.is_numeric());
    }

    #[test]
    fn test_find_property() {
        let reg = reg();
        assert!(reg.find_property("amountEur").is_some());
        assert!(reg.find_property("beneficiary").is_some());
        assert!(reg.find_property("no_such_prop").is_none());
    }

    #[test]
    fn test_caption_chain_inherited() {
        let reg = reg();
        assert_eq!(reg.caption_chain("Person"), vec!["name".to_string()]);
        assert_eq!(
            reg.caption_chain("Address"),
            vec!["full".to_string(), "name".to_string()]
        );
    }

    #[test]
    fn test_interval_bucketing() {
        let reg = reg();
        assert!(reg.is_interval("Payment"));
        assert!(reg.is_interval("Event"));
        assert!(!reg.is_interval("Person"));
    }
}
